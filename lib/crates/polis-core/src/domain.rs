//! Dot-boundary allowlist matcher for the response host allowlist.
//!
//! Prevents a suffix-only match from letting `evil-slack.com` pass as
//! `.slack.com` (CWE-346 class) by requiring the matched boundary to fall on
//! a DNS label, enforced by the leading dot on allowlist entries.

/// Check whether `host` is covered by `allowlist`.
///
/// Allowlist entries are dot-prefixed (e.g. `.api.slack.com`) for suffix
/// matching, or bare (no leading dot) for exact matching only. Comparison is
/// case-insensitive. Empty host never matches.
#[must_use]
pub fn is_allowed(host: &str, allowlist: &[String]) -> bool {
    if host.is_empty() {
        return false;
    }
    let host_lower = host.to_ascii_lowercase();

    allowlist.iter().any(|entry| {
        let entry_lower = entry.to_ascii_lowercase();
        match entry_lower.strip_prefix('.') {
            Some(bare) => {
                host_lower == bare
                    || (host_lower.ends_with(&entry_lower) && host_lower.len() > entry_lower.len())
            }
            None => host_lower == entry_lower,
        }
    })
}
