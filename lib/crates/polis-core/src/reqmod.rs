//! REQMOD rewriter: scans outbound request bodies for governance
//! commands, mints an OTT, and performs a length-preserving in-place
//! substitution of the captured `req-id`.

use chrono::{Duration, Utc};
use regex::Regex;
use std::sync::OnceLock;

use polis_common::{validate_request_id, OttAction, OttMapping};

use crate::audit::{embed_snapshot, escape_json_string};
use crate::error::CoreResult;
use crate::mint::{mint, EntropySource};
use crate::store::{CreateOutcome, StateStore};

/// Outcome of a REQMOD pass over a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// No governance command matched; body is returned unchanged.
    Unchanged,
    /// A command matched and the body was rewritten.
    Rewritten {
        /// The new body, same length as the input.
        body: String,
        /// The OTT that replaced the request id.
        ott: String,
    },
}

fn governance_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"/polis-(approve|except)\s+(req-[0-9a-f]{8})").unwrap()
    })
}

/// Run the REQMOD pass over an outbound request body.
///
/// `body` is assumed already bounded to the configured scan limit by the
/// caller (bodies over the limit are passed through unmodified upstream).
/// Every internal failure path (no blocked record, mint failure, OTT
/// collision twice) resolves to [`RewriteOutcome::Unchanged`] — REQMOD never
/// propagates an error to its caller.
pub async fn handle_reqmod(
    body: &str,
    host: &str,
    store: &dyn StateStore,
    entropy: &mut dyn EntropySource,
    time_gate_secs: u64,
    ott_ttl_secs: u64,
) -> RewriteOutcome {
    let Some(captures) = governance_pattern().captures(body) else {
        return RewriteOutcome::Unchanged;
    };

    let action_str = &captures[1];
    let request_id = &captures[2];

    if validate_request_id(request_id).is_err() {
        return RewriteOutcome::Unchanged;
    }

    let blocked = match store.get_blocked(request_id).await {
        Ok(Some(b)) => b,
        Ok(None) | Err(_) => return RewriteOutcome::Unchanged,
    };
    let _ = blocked; // presence is sufficient; reused by caller after consume.

    let action = match action_str {
        "approve" => OttAction::Approve,
        "except" => OttAction::Except,
        _ => return RewriteOutcome::Unchanged,
    };

    let mut ott = match mint(entropy) {
        Ok(o) => o,
        Err(e) => {
            tracing::error!(error = %e, "CRITICAL: entropy source unavailable, passing request through unmodified");
            return RewriteOutcome::Unchanged;
        }
    };

    let mapping = OttMapping {
        ott_code: ott.clone(),
        request_id: request_id.to_string(),
        armed_after: Utc::now() + Duration::seconds(time_gate_secs as i64),
        origin_host: host.to_string(),
        action,
        created_at: Utc::now(),
    };

    match create_with_one_retry(store, &mut ott, &mapping, ott_ttl_secs, entropy).await {
        Ok(true) => {}
        Ok(false) => return RewriteOutcome::Unchanged,
        Err(_) => return RewriteOutcome::Unchanged,
    }

    if store
        .append_audit(
            "ott_minted",
            Some(request_id),
            &embed_snapshot(&format!(
                "{{\"ott\":\"{}\",\"origin_host\":\"{}\"}}",
                ott,
                escape_json_string(host)
            )),
        )
        .await
        .is_err()
    {
        // Audit failure does not unwind the rewrite — the mapping is already
        // committed and will self-expire via TTL if nothing else happens.
        tracing::warn!(request_id = %request_id, "failed to append REQMOD audit entry");
    }

    // Length-preserving substitution: req-id and ott are both 12 bytes.
    debug_assert_eq!(request_id.len(), ott.len(), "req-id/ott length mismatch");
    let rewritten = body.replacen(request_id, &ott, 1);
    debug_assert_eq!(rewritten.len(), body.len());

    RewriteOutcome::Rewritten {
        body: rewritten,
        ott,
    }
}

/// Attempt `create_ott`, retrying once with a freshly minted OTT on
/// collision. Returns `Ok(true)` on success, `Ok(false)` if both attempts
/// collided (soft failure — caller passes through unmodified).
async fn create_with_one_retry(
    store: &dyn StateStore,
    ott: &mut String,
    mapping: &OttMapping,
    ttl_secs: u64,
    entropy: &mut dyn EntropySource,
) -> CoreResult<bool> {
    let mut mapping = mapping.clone();
    match store.create_ott(ott, &mapping, ttl_secs).await? {
        CreateOutcome::Created => return Ok(true),
        CreateOutcome::Collision => {}
    }

    let retry_ott = mint(entropy)?;
    mapping.ott_code = retry_ott.clone();
    match store.create_ott(&retry_ott, &mapping, ttl_secs).await? {
        CreateOutcome::Created => {
            *ott = retry_ott;
            Ok(true)
        }
        CreateOutcome::Collision => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mint::OsEntropySource;
    use crate::store::MockStateStore;
    use polis_common::{BlockReason, RequestStatus};

    fn seed(store: &MockStateStore, request_id: &str) {
        store.seed_blocked(polis_common::BlockedRequest {
            request_id: request_id.to_string(),
            reason: BlockReason::CredentialDetected,
            destination: "api.telegram.org".to_string(),
            pattern_name: Some("aws_access_key".to_string()),
            blocked_at: Utc::now(),
            status: RequestStatus::Pending,
            credential_hash: Some("a".repeat(64)),
            credential_prefix: Some("AKIA".to_string()),
        });
    }

    #[tokio::test]
    async fn no_match_leaves_body_unchanged() {
        let store = MockStateStore::new();
        let mut entropy = OsEntropySource;
        let body = "just a normal message";
        let outcome = handle_reqmod(body, "api.telegram.org", &store, &mut entropy, 15, 600).await;
        assert_eq!(outcome, RewriteOutcome::Unchanged);
    }

    #[tokio::test]
    async fn match_without_blocked_record_leaves_body_unchanged() {
        let store = MockStateStore::new();
        let mut entropy = OsEntropySource;
        let body = "Type: /polis-approve req-abc12345";
        let outcome = handle_reqmod(body, "api.telegram.org", &store, &mut entropy, 15, 600).await;
        assert_eq!(outcome, RewriteOutcome::Unchanged);
    }

    #[tokio::test]
    async fn rewrite_preserves_length_and_mints_mapping() {
        let store = MockStateStore::new();
        seed(&store, "req-abc12345");
        let mut entropy = OsEntropySource;
        let body = "Type: /polis-approve req-abc12345";

        let outcome = handle_reqmod(body, "api.telegram.org", &store, &mut entropy, 15, 600).await;
        match outcome {
            RewriteOutcome::Rewritten { body: out, ott } => {
                assert_eq!(out.len(), body.len());
                assert!(out.contains(&ott));
                assert!(!out.contains("req-abc12345"));

                let mapping = store.resolve_ott(&ott).await.unwrap().unwrap();
                assert_eq!(mapping.request_id, "req-abc12345");
                assert_eq!(mapping.origin_host, "api.telegram.org");
                assert_eq!(mapping.action, OttAction::Approve);
            }
            RewriteOutcome::Unchanged => panic!("expected rewrite"),
        }
    }

    #[tokio::test]
    async fn except_command_sets_except_action() {
        let store = MockStateStore::new();
        seed(&store, "req-abc12345");
        let mut entropy = OsEntropySource;
        let body = "/polis-except req-abc12345";

        let outcome = handle_reqmod(body, "api.telegram.org", &store, &mut entropy, 15, 600).await;
        let RewriteOutcome::Rewritten { ott, .. } = outcome else {
            panic!("expected rewrite");
        };
        let mapping = store.resolve_ott(&ott).await.unwrap().unwrap();
        assert_eq!(mapping.action, OttAction::Except);
    }

    #[tokio::test]
    async fn fail_closed_on_entropy_exhaustion_leaves_body_unchanged() {
        struct FailingSource;
        impl EntropySource for FailingSource {
            fn fill(&mut self, _buf: &mut [u8]) -> Result<(), String> {
                Err("exhausted".to_string())
            }
        }

        let store = MockStateStore::new();
        seed(&store, "req-abc12345");
        let mut entropy = FailingSource;
        let body = "Type: /polis-approve req-abc12345";

        let outcome = handle_reqmod(body, "api.telegram.org", &store, &mut entropy, 15, 600).await;
        assert_eq!(outcome, RewriteOutcome::Unchanged);
    }

    #[tokio::test]
    async fn invalid_request_id_shape_is_ignored() {
        let store = MockStateStore::new();
        let mut entropy = OsEntropySource;
        // Uppercase hex fails shape validation.
        let body = "/polis-approve req-ABCDEF01";
        let outcome = handle_reqmod(body, "api.telegram.org", &store, &mut entropy, 15, 600).await;
        assert_eq!(outcome, RewriteOutcome::Unchanged);
    }
}
