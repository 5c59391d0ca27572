//! Scavenger puzzle parameters
//!
//! The transform is a stand-in for the service's real puzzle function. These
//! values must not change without coordinating with whoever verifies digests.

/// Exponent applied to the double SHA-256 output (mod 2^256)
pub const TRANSFORM_EXPONENT: u64 = 3;

/// The additive constant is 10^ADDITIVE_CONSTANT_DECIMALS (mod 2^256)
pub const ADDITIVE_CONSTANT_DECIMALS: u64 = 64;

/// Digest size in bytes
pub const DIGEST_SIZE: usize = 32;

/// Digest size in hex characters
pub const DIGEST_HEX_LEN: usize = DIGEST_SIZE * 2;

/// Bits in a digest; any difficulty at or above this has an empty target
pub const DIGEST_BITS: u32 = (DIGEST_SIZE * 8) as u32;

/// Bits represented by one hex nibble
pub const BITS_PER_NIBBLE: u32 = 4;
