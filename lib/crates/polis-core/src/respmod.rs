//! RESPMOD OTT resolver: scans inbound response bodies on
//! allowlisted hosts for OTT occurrences, enforces the time-gate and
//! context-binding mitigations, commits state, and strips the token.

use chrono::Utc;
use regex::Regex;
use std::io::Read;
use std::sync::OnceLock;

use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;

use polis_common::OttAction;

use crate::domain::is_allowed;
use crate::error::CoreError;
use crate::store::StateStore;

/// Outcome of a RESPMOD pass over a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// No change was made — host not allowlisted, body too large, no OTT
    /// matched, or every match was skipped/rejected.
    Unchanged,
    /// At least one OTT was resolved and stripped.
    Modified {
        /// The (possibly recompressed) body to forward.
        body: Vec<u8>,
    },
}

fn ott_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)]
    RE.get_or_init(|| Regex::new(r"ott-[A-Za-z0-9]{8}").unwrap())
}

/// Run the RESPMOD pass over an inbound response body.
///
/// `body` is the raw (possibly gzip-compressed) response bytes; `host` is
/// the response's Host header; `gzip` indicates `Content-Encoding: gzip`.
/// `approval_ttl_secs` / `exception_ttl_secs` feed the respective commit
/// calls. `max_scan` bounds both the plaintext body size and the
/// decompression-bomb defense.
pub async fn handle_respmod(
    body: &[u8],
    host: &str,
    gzip: bool,
    allowlist: &[String],
    store: &dyn StateStore,
    approval_ttl_secs: u64,
    exception_ttl_secs: u64,
    max_scan: usize,
) -> ScanOutcome {
    if !is_allowed(host, allowlist) {
        return ScanOutcome::Unchanged;
    }
    if body.len() > max_scan {
        return ScanOutcome::Unchanged;
    }

    let plaintext = if gzip {
        match decompress_bounded(body, max_scan) {
            Ok(p) => p,
            Err(_) => return ScanOutcome::Unchanged,
        }
    } else {
        body.to_vec()
    };

    let Ok(mut text) = String::from_utf8(plaintext.clone()) else {
        return ScanOutcome::Unchanged;
    };

    let matches: Vec<String> = ott_pattern()
        .find_iter(&text)
        .map(|m| m.as_str().to_string())
        .collect();

    if matches.is_empty() {
        return ScanOutcome::Unchanged;
    }

    let mut any_stripped = false;
    for ott in matches {
        if ott.len() != 12 {
            continue;
        }
        match try_consume_one(&ott, host, store, approval_ttl_secs, exception_ttl_secs).await {
            Ok(true) => {
                // Length-preserving strip: overwrite with asterisks.
                text = text.replacen(&ott, &"*".repeat(ott.len()), 1);
                any_stripped = true;
            }
            Ok(false) => {}
            Err(_) => {}
        }
    }

    if !any_stripped {
        return ScanOutcome::Unchanged;
    }

    let out_bytes = text.into_bytes();
    if gzip {
        match recompress(&out_bytes) {
            Ok(recompressed) => ScanOutcome::Modified { body: recompressed },
            Err(_) => ScanOutcome::Unchanged,
        }
    } else {
        ScanOutcome::Modified { body: out_bytes }
    }
}

/// Attempt to resolve, validate, and commit a single OTT occurrence.
/// Returns `Ok(true)` if it was committed (and should be stripped),
/// `Ok(false)` if it should be left alone (not found, time-gated, or
/// rejected — all of which leave the mapping resolvable for a later
/// presentation), `Err` on an internal store error.
async fn try_consume_one(
    ott: &str,
    host: &str,
    store: &dyn StateStore,
    approval_ttl_secs: u64,
    exception_ttl_secs: u64,
) -> Result<bool, CoreError> {
    let Some(mapping) = store.resolve_ott(ott).await? else {
        return Ok(false);
    };

    let now = Utc::now();
    if now < mapping.armed_after {
        // time-gate: OTT remains resolvable for a later presentation.
        return Ok(false);
    }

    if !mapping.origin_host.eq_ignore_ascii_case(host) {
        // context mismatch: reject, but leave resolvable.
        tracing::warn!(
            origin_host = %mapping.origin_host,
            presented_host = %host,
            "OTT context mismatch, rejecting"
        );
        return Ok(false);
    }

    let Some(blocked) = store.get_blocked(&mapping.request_id).await? else {
        return Ok(false);
    };

    match mapping.action {
        OttAction::Approve => {
            store.commit_approval(&blocked, ott, approval_ttl_secs).await?;
        }
        OttAction::Except => {
            store
                .commit_exception(&blocked, ott, Some(exception_ttl_secs))
                .await?;
        }
    }

    Ok(true)
}

/// Decompress gzip `input`, growing the output buffer from 4x to 10x the
/// compressed size (both capped at `max_scan`) to defend against
/// decompression bombs.
fn decompress_bounded(input: &[u8], max_scan: usize) -> std::io::Result<Vec<u8>> {
    for factor in [4, 10] {
        let cap = (input.len() * factor).min(max_scan);
        let mut decoder = GzDecoder::new(input);
        let mut buf = Vec::with_capacity(cap.min(1 << 20));
        let mut limited = (&mut decoder).take(cap as u64);
        let n = limited.read_to_end(&mut buf)?;
        if n < cap || factor == 10 {
            return Ok(buf);
        }
        // Buffer filled exactly at the cap — might be truncated; try the
        // larger factor before giving up.
    }
    Err(std::io::Error::other("decompression exceeded scan bound"))
}

fn recompress(plaintext: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(plaintext, Compression::default());
    let mut out = Vec::with_capacity(plaintext.len());
    encoder.read_to_end(&mut out)?;
    Ok(out)
}
