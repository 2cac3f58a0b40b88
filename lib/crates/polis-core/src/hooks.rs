//! Request/response hook contract: the content-adaptation
//! runtime's REQMOD/RESPMOD channels are represented here as a trait so the
//! ICAP wire framing stays out of this crate's scope.

use async_trait::async_trait;

use crate::dlp::{handle_dlp, DlpOutcome};
use crate::mint::EntropySource;
use crate::reqmod::{handle_reqmod, RewriteOutcome};
use crate::respmod::{handle_respmod, ScanOutcome};
use crate::store::StateStore;

/// Per-request lifecycle hooks the adaptation runtime would normally drive.
/// `init_service`/`close_service` bracket the process; `init_per_request`/
/// `release_per_request` bracket one exchange; `preview`/`streaming_io`/
/// `end_of_data` deliver body chunks as they arrive.
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn init_service(&self) {}
    async fn init_per_request(&self, request_id: &str) {
        let _ = request_id;
    }
    async fn preview(&self, chunk: &[u8]) -> Vec<u8> {
        chunk.to_vec()
    }
    async fn streaming_io(&self, chunk: &[u8]) -> Vec<u8> {
        chunk.to_vec()
    }
    async fn end_of_data(&self, body: &[u8]) -> Vec<u8> {
        body.to_vec()
    }
    async fn release_per_request(&self, request_id: &str) {
        let _ = request_id;
    }
    async fn close_service(&self) {}
}

/// Default no-op implementation, useful as a baseline in tests and for
/// hosts that want only a subset of the lifecycle.
#[derive(Default)]
pub struct NoopHookHandler;

#[async_trait]
impl HookHandler for NoopHookHandler {}

/// Production handler wiring REQMOD, DLP, and RESPMOD against a shared
/// [`StateStore`]. The transport (ICAP framing, HTTP header parsing) is
/// assumed supplied by the caller; this handler only ever sees bodies and
/// the resolved `Host`.
pub struct IcapCoreHandler<'a> {
    store: &'a dyn StateStore,
    time_gate_secs: u64,
    ott_ttl_secs: u64,
    approval_ttl_secs: u64,
    exception_ttl_secs: u64,
    exception_lookup_timeout_ms: u64,
    allowlist: Vec<String>,
    max_scan: usize,
}

impl<'a> IcapCoreHandler<'a> {
    #[must_use]
    pub fn new(store: &'a dyn StateStore, config: &crate::config::CoreConfig) -> Self {
        Self {
            store,
            time_gate_secs: config.time_gate_secs,
            ott_ttl_secs: config.ott_ttl_secs,
            approval_ttl_secs: config.approval_ttl_secs,
            exception_ttl_secs: config.exception_ttl_default_secs,
            exception_lookup_timeout_ms: config.exception_lookup_timeout_ms,
            allowlist: config.allowlist(),
            max_scan: config.max_body_scan,
        }
    }

    /// REQMOD entry point: scan an outbound request body for a governance
    /// command and rewrite it if one is found.
    pub async fn handle_reqmod(
        &self,
        body: &str,
        host: &str,
        entropy: &mut dyn EntropySource,
    ) -> RewriteOutcome {
        if body.len() > self.max_scan {
            return RewriteOutcome::Unchanged;
        }
        handle_reqmod(
            body,
            host,
            self.store,
            entropy,
            self.time_gate_secs,
            self.ott_ttl_secs,
        )
        .await
    }

    /// RESPMOD entry point: scan an inbound response body on an allowlisted
    /// host for OTT occurrences and strip any that commit successfully.
    pub async fn handle_respmod(&self, body: &[u8], host: &str, content_encoding: &str) -> ScanOutcome {
        let gzip = content_encoding.eq_ignore_ascii_case("gzip");
        handle_respmod(
            body,
            host,
            gzip,
            &self.allowlist,
            self.store,
            self.approval_ttl_secs,
            self.exception_ttl_secs,
            self.max_scan,
        )
        .await
    }

    /// DLP entry point: inspect an outbound body for credential material.
    pub async fn handle_dlp(
        &self,
        body: &str,
        host: &str,
        mint_request_id: impl Fn() -> String,
    ) -> DlpOutcome {
        if body.len() > self.max_scan {
            return DlpOutcome::Allowed;
        }
        handle_dlp(
            body,
            host,
            self.store,
            self.exception_lookup_timeout_ms,
            mint_request_id,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_handler_passes_chunks_through_unchanged() {
        let handler = NoopHookHandler;
        let chunk = b"hello";
        assert_eq!(handler.preview(chunk).await, chunk);
        assert_eq!(handler.streaming_io(chunk).await, chunk);
        assert_eq!(handler.end_of_data(chunk).await, chunk);
    }

    #[tokio::test]
    async fn icap_core_handler_bypasses_oversize_reqmod_body() {
        use crate::config::CoreConfig;
        use crate::mint::OsEntropySource;
        use crate::store::MockStateStore;

        let store = MockStateStore::new();
        let mut config = CoreConfig::default();
        config.max_body_scan = 4;
        let handler = IcapCoreHandler::new(&store, &config);
        let mut entropy = OsEntropySource;

        let outcome = handler
            .handle_reqmod("/polis-approve req-abc12345", "api.telegram.org", &mut entropy)
            .await;
        assert_eq!(outcome, RewriteOutcome::Unchanged);
    }
}
