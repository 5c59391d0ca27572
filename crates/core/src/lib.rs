//! # Scavenger Puzzle Core
//!
//! The hash puzzle used by the Scavenger reward service: a digest transform
//! over `(challenge, nonce)` pairs and the difficulty target a digest must
//! fall below.
//!
//! The transform is a placeholder for the service's real puzzle function. It
//! is deterministic and pseudo-random enough to drive a nonce search, and
//! nothing more is claimed for it.
//!
//! ## Algorithm
//!
//! - Double SHA-256 over `challenge || nonce` (UTF-8)
//! - Read the result as a little-endian 256-bit integer
//! - Cube it and add `10^64`, both modulo `2^256`
//! - Serialize as 64 big-endian hex characters
//!
//! ## Example
//!
//! ```rust
//! use scavenger_core::{compute_digest, is_valid, Target, digest_value};
//!
//! let digest = compute_digest("challenge payload", "0");
//!
//! // Difficulty 0 accepts any digest below 2^256 - 1
//! assert!(is_valid(&digest, 0));
//!
//! // Search loops should precompute the target once
//! let target = Target::from_bits(8);
//! let _ = target.is_met_by(digest_value("challenge payload", "1"));
//! ```

mod params;
mod puzzle;

pub use alloy_primitives::U256;
pub use params::*;
pub use puzzle::{
    Target, compute_digest, digest_value, encode_digest, estimate_difficulty_bits, is_valid,
    parse_digest,
};

#[cfg(test)]
mod tests;
