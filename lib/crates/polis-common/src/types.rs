use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason why a request was blocked by the security layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    CredentialDetected,
    MalwareDomain,
    UrlBlocked,
    FileInfected,
}

/// Security level configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Relaxed,
    #[default]
    Balanced,
    Strict,
}

/// Status of a security request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

/// A blocked request awaiting approval.
///
/// `credential_hash`/`credential_prefix` are populated only when the block
/// was raised by the DLP inspector matching a credential pattern; the raw
/// matched value is never stored anywhere (CWE-200/CWE-522).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedRequest {
    pub request_id: String,
    pub reason: BlockReason,
    pub destination: String,
    pub pattern_name: Option<String>,
    pub blocked_at: DateTime<Utc>,
    pub status: RequestStatus,
    #[serde(default)]
    pub credential_hash: Option<String>,
    #[serde(default)]
    pub credential_prefix: Option<String>,
}

/// User confirmation for approval requests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserConfirmation {
    Yes,
    No,
    Approve,
    Allow,
    Deny,
}

/// Auto-approve rule action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AutoApproveAction {
    Allow,
    Prompt,
    Block,
}

/// Source channel for an approval action (for audit logging)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalSource {
    /// Approved via proxy RESPMOD interception (user typed command in chat)
    ProxyInterception,
    /// Approved via CLI tool on host/gateway
    Cli,
    /// Approved via MCP-Admin server (IDE integration, post-MVP)
    McpAdmin,
}

/// Auto-approve configuration rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoApproveRule {
    pub pattern: String,
    pub action: AutoApproveAction,
}

/// Single log entry for security events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub request_id: Option<String>,
    pub details: String,
}

/// Which governance command a rewritten OTT stands in for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OttAction {
    /// `/polis-approve` — commits a one-shot approval record.
    Approve,
    /// `/polis-except` — commits a persistent value-based exception.
    Except,
}

/// One-Time Token mapping created by REQMOD code rewriting.
/// Maps the OTT code (visible to user) back to the original request_id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OttMapping {
    /// The OTT code that replaced the request_id in the outbound message
    pub ott_code: String,
    /// The original request_id this OTT maps to
    pub request_id: String,
    /// Timestamp after which this OTT becomes valid (time-gate)
    pub armed_after: DateTime<Utc>,
    /// The destination host that triggered OTT generation (context binding)
    pub origin_host: String,
    /// Which governance command minted this OTT
    pub action: OttAction,
    /// When this mapping was created
    pub created_at: DateTime<Utc>,
}

/// Who created a persistent value exception.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionSource {
    /// Created via RESPMOD committing a `/polis-except` OTT.
    Proxy,
    /// Created via the administrator CLI.
    Cli,
}

/// A persistent value-based DLP exception.
///
/// Stored under `exception:value:{hash[..16]}:{destination}`. `destination`
/// is either a concrete host or `"*"` (wildcard, CLI-only). The proxy path
/// never creates a wildcard or permanent (`ttl_secs: None`) exception.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueException {
    /// Full 64-hex-char SHA-256 hash of the credential value.
    pub credential_hash: String,
    /// First 4 characters of the raw credential value, for display only.
    pub credential_prefix: String,
    /// Concrete host or `"*"`.
    pub destination: String,
    pub pattern_name: String,
    pub created_at: DateTime<Utc>,
    pub source: ExceptionSource,
    /// `None` means permanent (CLI-only).
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}
