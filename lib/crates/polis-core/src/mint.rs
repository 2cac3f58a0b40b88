//! One-Time Token minting.
//!
//! Draws bytes from the OS cryptographic random source and rejects any byte
//! that would introduce modulo bias against the 62-symbol alphabet, mapping
//! survivors into `[A-Za-z0-9]`. Fails closed: callers that see `Err` must
//! pass the request through unmodified rather than invent a fallback token.

use rand::RngCore;

use crate::error::{CoreError, CoreResult};
use polis_common::redis_keys::approval::{OTT_PREFIX, OTT_RANDOM_LEN};

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ALPHABET_LEN: u32 = 62;
// Largest multiple of 62 that fits in a byte; bytes >= this are rejected to
// avoid modulo bias.
const REJECTION_THRESHOLD: u8 = (256 - (256 % ALPHABET_LEN as u16)) as u8;
// Generous bound on sampling attempts before treating the source as
// exhausted; expected attempts per char is ~256/234 ≈ 1.09, so 256 attempts
// per character is an ample safety margin.
const MAX_ATTEMPTS: usize = 256 * OTT_RANDOM_LEN;

/// Source of cryptographic randomness for token minting.
///
/// Abstracted so tests can force entropy exhaustion without touching
/// process-global RNG state.
pub trait EntropySource {
    /// Fill `buf` with random bytes, or fail (e.g. OS source unavailable).
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), String>;
}

/// Production entropy source backed by `rand::rngs::OsRng`.
#[derive(Debug, Default)]
pub struct OsEntropySource;

impl EntropySource for OsEntropySource {
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), String> {
        rand::rngs::OsRng.fill_bytes(buf);
        Ok(())
    }
}

/// Mint a fresh OTT code (`ott-` + 8 alphanumeric chars) using `source`.
///
/// # Errors
///
/// Returns [`CoreError::EntropySourceUnavailable`] if the source fails or if
/// the rejection-sampling loop does not accumulate enough characters within
/// [`MAX_ATTEMPTS`] draws. Callers MUST treat this as fail-closed: pass the
/// request through unmodified, do not retry with a weaker source.
pub fn mint(source: &mut dyn EntropySource) -> CoreResult<String> {
    let mut suffix = Vec::with_capacity(OTT_RANDOM_LEN);
    let mut attempts = 0usize;
    let mut byte_buf = [0u8; 1];

    while suffix.len() < OTT_RANDOM_LEN {
        if attempts >= MAX_ATTEMPTS {
            return Err(CoreError::EntropySourceUnavailable(format!(
                "rejection sampling exceeded {MAX_ATTEMPTS} attempts"
            )));
        }
        attempts += 1;

        source
            .fill(&mut byte_buf)
            .map_err(CoreError::EntropySourceUnavailable)?;

        let b = byte_buf[0];
        if b >= REJECTION_THRESHOLD {
            continue;
        }
        let idx = (u32::from(b) % ALPHABET_LEN) as usize;
        suffix.push(ALPHABET[idx]);
    }

    let suffix = String::from_utf8(suffix)
        .map_err(|e| CoreError::EntropySourceUnavailable(format!("non-utf8 mint output: {e}")))?;
    Ok(format!("{OTT_PREFIX}{suffix}"))
}

/// Mint using the production OS entropy source.
pub fn mint_ott() -> CoreResult<String> {
    mint(&mut OsEntropySource)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polis_common::validate_ott_code;
    use std::collections::HashSet;

    struct FailingSource;
    impl EntropySource for FailingSource {
        fn fill(&mut self, _buf: &mut [u8]) -> Result<(), String> {
            Err("source exhausted".to_string())
        }
    }

    /// Always yields a rejected byte, forcing the attempt budget to exhaust.
    struct AlwaysRejectedSource;
    impl EntropySource for AlwaysRejectedSource {
        fn fill(&mut self, buf: &mut [u8]) -> Result<(), String> {
            buf.fill(255);
            Ok(())
        }
    }

    #[test]
    fn mint_produces_valid_shape() {
        let ott = mint_ott().unwrap();
        assert!(validate_ott_code(&ott).is_ok(), "{ott} failed shape validation");
    }

    #[test]
    fn mint_fails_closed_on_source_error() {
        let mut source = FailingSource;
        let err = mint(&mut source).unwrap_err();
        assert!(matches!(err, CoreError::EntropySourceUnavailable(_)));
    }

    #[test]
    fn mint_fails_closed_when_sampling_never_terminates() {
        let mut source = AlwaysRejectedSource;
        let err = mint(&mut source).unwrap_err();
        assert!(matches!(err, CoreError::EntropySourceUnavailable(_)));
    }

    // Scaled-down uniqueness check: no repeats and every token matches the
    // shape over a reduced N suitable for a unit test run.
    #[test]
    fn no_repeats_over_50000_mints() {
        let n = 50_000;
        let mut seen = HashSet::with_capacity(n);
        for _ in 0..n {
            let ott = mint_ott().unwrap();
            assert!(validate_ott_code(&ott).is_ok());
            assert!(seen.insert(ott), "duplicate OTT observed within {n} mints");
        }
    }

    #[test]
    fn rejection_threshold_is_largest_multiple_of_62_under_256() {
        assert_eq!(REJECTION_THRESHOLD, 62 * 4);
    }
}
