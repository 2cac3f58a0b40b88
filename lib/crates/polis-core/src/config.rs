//! Process-wide configuration for the approval core, loaded once at startup
//! via `envy::prefixed("POLIS_CORE_")` (see `icap-server`'s `main`).

use serde::Deserialize;

use polis_common::redis_keys::{approval, ttl};

/// Configuration for the REQMOD/RESPMOD/DLP core.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// Seconds after mint before an OTT becomes valid (echo-defense).
    #[serde(default = "default_time_gate_secs")]
    pub time_gate_secs: u64,

    /// TTL applied to OTT mappings.
    #[serde(default = "default_ott_ttl_secs")]
    pub ott_ttl_secs: u64,

    /// TTL applied to approval records.
    #[serde(default = "default_approval_ttl_secs")]
    pub approval_ttl_secs: u64,

    /// Default TTL applied to proxy-created value exceptions.
    #[serde(default = "default_exception_ttl_secs")]
    pub exception_ttl_default_secs: u64,

    /// Comma-separated, dot-prefixed allowlist of domains RESPMOD scans.
    #[serde(default = "default_allowlist_domains")]
    pub allowlist_domains: String,

    /// Maximum body size (bytes) considered for REQMOD/RESPMOD/DLP scanning.
    #[serde(default = "default_max_body_scan")]
    pub max_body_scan: usize,

    /// Hard ceiling on concurrently active value exceptions.
    #[serde(default = "default_max_exceptions")]
    pub max_exceptions: u64,

    /// Deadline, in milliseconds, for exception-store lookups in the DLP
    /// hot path. Exceeding this deadline is treated as fail-closed.
    #[serde(default = "default_exception_lookup_timeout_ms")]
    pub exception_lookup_timeout_ms: u64,
}

fn default_time_gate_secs() -> u64 {
    approval::DEFAULT_TIME_GATE_SECS
}

fn default_ott_ttl_secs() -> u64 {
    ttl::OTT_MAPPING_SECS
}

fn default_approval_ttl_secs() -> u64 {
    ttl::APPROVED_REQUEST_SECS
}

fn default_exception_ttl_secs() -> u64 {
    ttl::EXCEPTION_VALUE_DEFAULT_SECS
}

fn default_allowlist_domains() -> String {
    approval::DEFAULT_APPROVAL_DOMAINS.join(",")
}

fn default_max_body_scan() -> usize {
    2 * 1024 * 1024
}

fn default_max_exceptions() -> u64 {
    ttl::MAX_EXCEPTIONS
}

fn default_exception_lookup_timeout_ms() -> u64 {
    5
}

impl CoreConfig {
    /// Parse `allowlist_domains` into the dot-prefixed entries the domain
    /// matcher expects.
    #[must_use]
    pub fn allowlist(&self) -> Vec<String> {
        self.allowlist_domains
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            time_gate_secs: default_time_gate_secs(),
            ott_ttl_secs: default_ott_ttl_secs(),
            approval_ttl_secs: default_approval_ttl_secs(),
            exception_ttl_default_secs: default_exception_ttl_secs(),
            allowlist_domains: default_allowlist_domains(),
            max_body_scan: default_max_body_scan(),
            max_exceptions: default_max_exceptions(),
            exception_lookup_timeout_ms: default_exception_lookup_timeout_ms(),
        }
    }
}
