//! Tests for the Scavenger puzzle

use crate::{
    DIGEST_HEX_LEN, Target, U256, compute_digest, digest_value, encode_digest,
    estimate_difficulty_bits, is_valid, parse_digest,
};
use proptest::prelude::*;

#[test]
fn test_basic_digest() {
    let digest = compute_digest("abc", "0");

    // Fixed width, lowercase
    assert_eq!(digest.len(), DIGEST_HEX_LEN);
    assert_eq!(digest, digest.to_lowercase());

    // Deterministic
    assert_eq!(digest, compute_digest("abc", "0"));
}

#[test]
fn test_known_vectors() {
    // Reference values computed independently from the transform definition.
    // Update only if the transform intentionally changes.
    assert_eq!(
        compute_digest("abc", "0"),
        "2fe2681d06f1f5648a5f9de10a17936bb4960be99917b9f91211edca9e87d040"
    );
    assert_eq!(
        compute_digest("abc", "1"),
        "868002f5082683be344e75f4d3e9b51417463154c81962c7533966fae8c6a82d"
    );
    assert_eq!(
        compute_digest("", "0"),
        "a0e66eb4da3fe1e0143dd08d05427e99a3210f1693768478546d30d197354b77"
    );
    assert_eq!(
        compute_digest("challenge-218", "42"),
        "44bb441cd72ae8a7bf0317deedd035316e792ef81cb4a37e99640888ebe4fb61"
    );
}

#[test]
fn test_concatenation_is_plain() {
    // Challenge and nonce are joined without a separator
    assert_eq!(compute_digest("ab", "c0"), compute_digest("abc", "0"));
    assert_ne!(compute_digest("abc", "0"), compute_digest("abc", "00"));
}

#[test]
fn test_first_valid_nonces() {
    // First nonce meeting each difficulty for payload "abc"
    let first_valid = |bits: u32| {
        (0u64..)
            .map(|n| n.to_string())
            .find(|n| is_valid(&compute_digest("abc", n), bits))
            .unwrap()
    };

    assert_eq!(first_valid(0), "0");
    assert_eq!(first_valid(4), "2");
    assert_eq!(first_valid(8), "459");
    assert!(compute_digest("abc", "459").starts_with("00"));
}

#[test]
fn test_difficulty_zero_accepts_everything_below_max() {
    assert!(is_valid(&compute_digest("abc", "0"), 0));
    assert!(is_valid(&"0".repeat(DIGEST_HEX_LEN), 0));

    // The target is exclusive
    assert!(!is_valid(&"f".repeat(DIGEST_HEX_LEN), 0));
}

#[test]
fn test_difficulty_boundaries() {
    // 8 bits: target is 0x00ff...ff
    let target_hex = format!("00{}", "f".repeat(DIGEST_HEX_LEN - 2));
    assert!(!is_valid(&target_hex, 8));

    let below = format!("00{}e", "f".repeat(DIGEST_HEX_LEN - 3));
    assert!(is_valid(&below, 8));

    let leading_one = format!("01{}", "0".repeat(DIGEST_HEX_LEN - 2));
    assert!(!is_valid(&leading_one, 8));
    assert!(is_valid(&leading_one, 7));
}

#[test]
fn test_extreme_difficulties() {
    let zero = "0".repeat(DIGEST_HEX_LEN);

    assert!(is_valid(&zero, 255));
    assert!(!is_valid(&zero, 256));
    assert!(!is_valid(&zero, u32::MAX));

    assert_eq!(Target::from_bits(0).threshold(), U256::MAX);
    assert_eq!(Target::from_bits(256).threshold(), U256::ZERO);
    assert_eq!(Target::from_bits(255).threshold(), U256::from(1u64));
}

#[test]
fn test_malformed_digests_are_invalid() {
    assert!(!is_valid("", 0));
    assert!(!is_valid("not hex", 0));
    assert!(!is_valid("0xzz", 0));

    // Wider than 256 bits
    let too_wide = format!("1{}", "0".repeat(DIGEST_HEX_LEN));
    assert!(!is_valid(&too_wide, 0));
    assert_eq!(parse_digest(&too_wide), None);
}

#[test]
fn test_short_and_prefixed_digests() {
    assert_eq!(parse_digest("ff"), Some(U256::from(255u64)));
    assert_eq!(parse_digest("0xff"), Some(U256::from(255u64)));
    assert_eq!(parse_digest("  0A  "), Some(U256::from(10u64)));
    assert!(is_valid("ff", 200));
}

#[test]
fn test_digest_value_matches_hex() {
    let value = digest_value("abc", "459");
    assert_eq!(encode_digest(value), compute_digest("abc", "459"));
    assert_eq!(parse_digest(&compute_digest("abc", "459")), Some(value));
}

#[test]
fn test_estimate_difficulty_bits() {
    assert_eq!(estimate_difficulty_bits("00ab"), 8);
    assert_eq!(estimate_difficulty_bits("000a1b"), 12);
    assert_eq!(estimate_difficulty_bits("ab00"), 0);
    assert_eq!(estimate_difficulty_bits("0x0001"), 12);
    assert_eq!(estimate_difficulty_bits("0X0f"), 4);
    assert_eq!(estimate_difficulty_bits(""), 0);
    assert_eq!(estimate_difficulty_bits("   "), 0);
    assert_eq!(estimate_difficulty_bits("0000"), 16);
}

fn reference_target(bits: u32) -> Option<U256> {
    // (2^256 - 1) / 2^bits, computed by division rather than shifting
    if bits >= 256 {
        return None;
    }
    Some(U256::MAX / (U256::from(1u64) << (bits as usize)))
}

proptest! {
    #[test]
    fn prop_is_valid_matches_target_formula(bytes in any::<[u8; 32]>(), bits in 0u32..300) {
        let value = U256::from_be_bytes(bytes);
        let expected = match reference_target(bits) {
            Some(target) => value < target,
            None => false,
        };
        prop_assert_eq!(is_valid(&encode_digest(value), bits), expected);
    }

    #[test]
    fn prop_zero_bits_is_maximal_target(bytes in any::<[u8; 32]>()) {
        let value = U256::from_be_bytes(bytes);
        prop_assert_eq!(is_valid(&encode_digest(value), 0), value < U256::MAX);
    }

    #[test]
    fn prop_digest_is_deterministic(challenge in ".{0,64}", nonce in any::<u64>()) {
        let nonce = nonce.to_string();
        let first = compute_digest(&challenge, &nonce);
        prop_assert_eq!(first.len(), DIGEST_HEX_LEN);
        prop_assert_eq!(&first, &compute_digest(&challenge, &nonce));
    }

    #[test]
    fn prop_estimate_counts_leading_zero_nibbles(zeros in 0usize..16, tail in "[1-9a-f][0-9a-f]{0,8}") {
        let hex = format!("{}{}", "0".repeat(zeros), tail);
        prop_assert_eq!(estimate_difficulty_bits(&hex), zeros as u32 * 4);
    }
}
