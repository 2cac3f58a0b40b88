//! Audit log writer.
//!
//! The durable write happens through [`crate::store::StateStore::append_audit`],
//! which also mirrors each entry to `tracing` for operational visibility.
//! This module owns the JSON-escaping helper shared by every caller that
//! embeds untrusted strings (hosts, request bodies) into an audit entry.

/// Escape `"` and `\` in `s` so it is safe to embed as a JSON string value.
///
/// Untrusted input (hosts, request ids) flows into audit JSON; this must run
/// before that embedding.
#[must_use]
pub fn escape_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}

/// Build a JSON-safe audit `details` string embedding a blocked-request
/// snapshot.
///
/// If `snapshot_json` is itself parseable JSON (starts with `{`), it is
/// inlined verbatim. Otherwise it is wrapped as an escaped quoted string
/// with a warning logged — a malformed snapshot must never break the
/// audit entry's own JSON validity.
#[must_use]
pub fn embed_snapshot(snapshot_json: &str) -> String {
    if snapshot_json.trim_start().starts_with('{') {
        format!("{{\"blocked_request\":{snapshot_json}}}")
    } else {
        tracing::warn!("blocked-request snapshot did not look like JSON; wrapping as string");
        format!(
            "{{\"blocked_request\":\"{}\"}}",
            escape_json_string(snapshot_json)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaping_round_trips_a_host_containing_quotes_and_backslashes() {
        let host = r#"evil"host\attack"#;
        let escaped = escape_json_string(host);
        let wrapped = format!("{{\"origin_host\":\"{escaped}\"}}");

        let parsed: serde_json::Value = serde_json::from_str(&wrapped).unwrap();
        assert_eq!(parsed["origin_host"].as_str().unwrap(), host);
    }

    #[test]
    fn escape_json_string_passes_through_plain_text() {
        assert_eq!(escape_json_string("api.telegram.org"), "api.telegram.org");
    }

    #[test]
    fn embed_snapshot_inlines_valid_json() {
        let snapshot = r#"{"request_id":"req-abc12345"}"#;
        let details = embed_snapshot(snapshot);
        let parsed: serde_json::Value = serde_json::from_str(&details).unwrap();
        assert_eq!(
            parsed["blocked_request"]["request_id"].as_str().unwrap(),
            "req-abc12345"
        );
    }

    #[test]
    fn embed_snapshot_wraps_non_json_as_escaped_string() {
        let details = embed_snapshot("not json at all");
        let parsed: serde_json::Value = serde_json::from_str(&details).unwrap();
        assert_eq!(
            parsed["blocked_request"].as_str().unwrap(),
            "not json at all"
        );
    }
}
