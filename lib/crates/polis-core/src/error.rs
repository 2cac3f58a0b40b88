//! Error taxonomy for the approval core.
//!
//! Every variant here is recovered locally at its handler boundary — none of
//! it is meant to propagate past `handle_reqmod`/`handle_respmod`. Only
//! startup-time failures (bad config, pattern compile error, missing
//! credential file) should ever abort a process.

/// Errors raised while minting, rewriting, scanning, or committing.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A req-id, OTT, or embedded host failed shape validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The OS random source failed, returned a short read, or the
    /// rejection-sampling loop exceeded its attempt budget.
    #[error("entropy source unavailable: {0}")]
    EntropySourceUnavailable(String),

    /// The state store could not be reached, authenticated, or timed out.
    #[error("state store unavailable: {0}")]
    StoreUnavailable(String),

    /// A SETNX-style create collided with an existing key.
    #[error("state store key collision: {0}")]
    StoreCollision(String),

    /// An OTT was presented before its time-gate opened.
    #[error("OTT presented before time-gate: armed_after={armed_after}, now={now}")]
    TimeGateOpen {
        /// Unix timestamp the OTT becomes valid.
        armed_after: i64,
        /// Unix timestamp of the presentation.
        now: i64,
    },

    /// An OTT was presented on a host other than the one it was minted for.
    #[error("OTT context mismatch: minted for {origin_host}, presented on {presented_host}")]
    ContextMismatch {
        /// Host the OTT mapping was created against.
        origin_host: String,
        /// Host the OTT was actually presented on.
        presented_host: String,
    },

    /// A `/polis-except` commit was attempted against a blocked record with
    /// no `credential_hash` captured.
    #[error("blocked record {request_id} has no credential_hash; cannot create exception")]
    MissingCredentialHash {
        /// The request id of the blocked record.
        request_id: String,
    },

    /// Gzip decompression of a response body failed or exceeded its bound.
    #[error("decompression failure: {0}")]
    DecompressionFailure(String),

    /// A body exceeded the configured scan limit and was bypassed.
    #[error("body exceeds scan limit ({size} > {limit} bytes)")]
    BodyTooLarge {
        /// Actual body size in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },
}

/// Result alias used throughout the approval core.
pub type CoreResult<T> = Result<T, CoreError>;
