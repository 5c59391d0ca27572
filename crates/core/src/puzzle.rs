//! Scavenger puzzle digest and difficulty checks
//!
//! A candidate is scored as follows:
//!
//! ```text
//! h1    = SHA-256(utf8(challenge) || utf8(nonce))
//! h2    = SHA-256(h1)
//! x     = h2 read as an unsigned little-endian integer
//! value = (x^3 mod 2^256 + 10^64) mod 2^256
//! ```
//!
//! and is valid when `value < (2^256 - 1) / 2^difficulty_bits`.

use std::sync::LazyLock;

use alloy_primitives::U256;
use sha2::{Digest, Sha256};

use crate::params::*;

static ADDITIVE_CONSTANT: LazyLock<U256> =
    LazyLock::new(|| U256::from(10u64).pow(U256::from(ADDITIVE_CONSTANT_DECIMALS)));

/// Compute the numeric digest value of a `(challenge, nonce)` pair.
pub fn digest_value(challenge: &str, nonce: &str) -> U256 {
    let mut hasher = Sha256::new();
    hasher.update(challenge.as_bytes());
    hasher.update(nonce.as_bytes());
    let first = hasher.finalize();
    let second = Sha256::digest(first);

    let mut bytes = [0u8; DIGEST_SIZE];
    bytes.copy_from_slice(&second);

    transform(U256::from_le_bytes(bytes))
}

/// Compute the digest of a `(challenge, nonce)` pair as fixed-width lowercase hex.
///
/// # Example
///
/// ```rust
/// use scavenger_core::compute_digest;
///
/// let digest = compute_digest("abc", "0");
/// assert_eq!(digest.len(), 64);
/// assert_eq!(digest, compute_digest("abc", "0"));
/// ```
pub fn compute_digest(challenge: &str, nonce: &str) -> String {
    encode_digest(digest_value(challenge, nonce))
}

/// Serialize a digest value as 64 big-endian hex characters.
pub fn encode_digest(value: U256) -> String {
    hex::encode(value.to_be_bytes::<DIGEST_SIZE>())
}

/// Parse a big-endian hex digest. Returns `None` for empty, malformed or
/// wider-than-256-bit input.
pub fn parse_digest(hex_digest: &str) -> Option<U256> {
    let s = strip_hex_prefix(hex_digest.trim());
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let significant = s.trim_start_matches('0');
    if significant.len() > DIGEST_HEX_LEN {
        return None;
    }

    let padded = format!("{:0>width$}", significant, width = DIGEST_HEX_LEN);
    let mut bytes = [0u8; DIGEST_SIZE];
    hex::decode_to_slice(padded, &mut bytes).ok()?;

    Some(U256::from_be_bytes(bytes))
}

/// Check a hex digest against a difficulty expressed in bits.
///
/// Malformed digests are never valid.
pub fn is_valid(hex_digest: &str, difficulty_bits: u32) -> bool {
    match parse_digest(hex_digest) {
        Some(value) => Target::from_bits(difficulty_bits).is_met_by(value),
        None => false,
    }
}

/// Estimate difficulty bits from a hex target string by counting leading
/// zero nibbles. This is a heuristic, not an exact conversion.
///
/// ```rust
/// use scavenger_core::estimate_difficulty_bits;
///
/// assert_eq!(estimate_difficulty_bits("00ab12"), 8);
/// assert_eq!(estimate_difficulty_bits("0x000f"), 12);
/// assert_eq!(estimate_difficulty_bits("ab"), 0);
/// ```
pub fn estimate_difficulty_bits(hex_target: &str) -> u32 {
    let zero_nibbles = strip_hex_prefix(hex_target.trim())
        .chars()
        .take_while(|c| *c == '0')
        .count() as u32;

    zero_nibbles * BITS_PER_NIBBLE
}

/// Precomputed difficulty threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    threshold: U256,
    bits: u32,
}

impl Target {
    /// Target for `bits` of difficulty: `(2^256 - 1) / 2^bits`.
    ///
    /// Zero bits yields the maximal target; 256 or more yields an empty one.
    pub fn from_bits(bits: u32) -> Self {
        let threshold = if bits >= DIGEST_BITS {
            U256::ZERO
        } else {
            U256::MAX >> (bits as usize)
        };
        Self { threshold, bits }
    }

    /// Threshold a digest must stay strictly below
    pub fn threshold(&self) -> U256 {
        self.threshold
    }

    /// Difficulty this target was derived from
    pub fn bits(&self) -> u32 {
        self.bits
    }

    #[inline]
    pub fn is_met_by(&self, value: U256) -> bool {
        value < self.threshold
    }
}

#[inline]
fn transform(input: U256) -> U256 {
    input
        .wrapping_pow(U256::from(TRANSFORM_EXPONENT))
        .wrapping_add(*ADDITIVE_CONSTANT)
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}
