//! Normalized protocol types and the wire formats of both endpoint families
//!
//! Responses from either API are decoded after their keys have been
//! lower-cased, so the wire structs below name every field in lowercase.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use crate::puzzle::estimate_difficulty_bits;

/// Terms and conditions the service asks miners to sign
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terms {
    pub version: String,
    pub terms: String,
    pub message: String,
}

impl Terms {
    pub fn is_empty(&self) -> bool {
        self.version.trim().is_empty()
            && self.terms.trim().is_empty()
            && self.message.trim().is_empty()
    }

    /// Text a wallet signs during registration: the explicit message when the
    /// service provides one, the terms body otherwise.
    pub fn signable_message(&self) -> &str {
        if self.message.trim().is_empty() {
            &self.terms
        } else {
            &self.message
        }
    }
}

/// Status of the global challenge schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Active,
    Before,
    After,
    Unknown,
    Error,
}

impl ChallengeStatus {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "active" => Self::Active,
            "before" => Self::Before,
            "after" => Self::After,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Before => "before",
            Self::After => "after",
            Self::Unknown => "unknown",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Challenge difficulty as delivered by the API that issued it.
///
/// The versioned API sends a bit strength, the legacy API a hex target. The
/// two are not reconciled; `bits()` only estimates for hex targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Bits(u32),
    HexTarget(String),
}

impl Difficulty {
    pub fn bits(&self) -> u32 {
        match self {
            Self::Bits(bits) => *bits,
            Self::HexTarget(hex) => estimate_difficulty_bits(hex),
        }
    }

    pub fn hex(&self) -> Option<&str> {
        match self {
            Self::Bits(_) => None,
            Self::HexTarget(hex) => Some(hex),
        }
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self::Bits(0)
    }
}

/// A puzzle instance issued by the service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub challenge_id: String,
    /// Raw string hashed together with each candidate nonce
    pub payload: String,
    pub difficulty: Difficulty,
    pub timestamp: i64,
    pub day: u32,
    pub challenge_number: u32,
    pub no_pre_mine: String,
    pub no_pre_mine_hour: String,
    pub latest_submission: String,
}

impl Challenge {
    pub fn difficulty_bits(&self) -> u32 {
        self.difficulty.bits()
    }
}

/// Normalized answer to a global challenge query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeResponse {
    pub status: ChallengeStatus,
    pub challenge: Option<Challenge>,
}

impl ChallengeResponse {
    pub fn error() -> Self {
        Self {
            status: ChallengeStatus::Error,
            challenge: None,
        }
    }

    /// The challenge, if the schedule is active and one was issued
    pub fn active_challenge(&self) -> Option<&Challenge> {
        match self.status {
            ChallengeStatus::Active => self.challenge.as_ref(),
            _ => None,
        }
    }
}

/// Opaque token proving a successful registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationReceipt {
    pub preimage: String,
}

/// Proof that the service accepted a solution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolutionReceipt {
    /// Transaction hash, receipt id or legacy receipt signature
    pub tx_hash: String,
    pub preimage: Option<String>,
    pub timestamp: Option<String>,
    pub reward: Option<f64>,
}

/// Current conversion rate between work units and reward units
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkRate {
    pub rate: f64,
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Versioned API (/api/v2)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct V2Terms {
    terms: String,
    version: String,
    message: String,
}

impl From<V2Terms> for Terms {
    fn from(raw: V2Terms) -> Self {
        Self {
            version: raw.version,
            terms: raw.terms,
            message: raw.message,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct V2Registration {
    pub success: bool,
    pub message: String,
    #[serde(rename = "workerid")]
    pub worker_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct V2Challenge {
    #[serde(rename = "challengeid")]
    challenge_id: String,
    challenge: String,
    difficulty: i64,
    timestamp: i64,
}

impl From<V2Challenge> for Challenge {
    fn from(raw: V2Challenge) -> Self {
        let bits = u32::try_from(raw.difficulty.max(0)).unwrap_or(u32::MAX);
        Self {
            challenge_id: raw.challenge_id,
            payload: raw.challenge,
            difficulty: Difficulty::Bits(bits),
            timestamp: raw.timestamp,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct V2CurrentChallenge {
    pub code: String,
    pub challenge: Option<V2Challenge>,
}

impl V2CurrentChallenge {
    pub fn is_empty(&self) -> bool {
        self.code.trim().is_empty() && self.challenge.is_none()
    }
}

impl From<V2CurrentChallenge> for ChallengeResponse {
    fn from(raw: V2CurrentChallenge) -> Self {
        Self {
            status: ChallengeStatus::from_code(&raw.code),
            challenge: raw.challenge.map(Challenge::from),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct V2WorkerChallenge {
    pub success: bool,
    pub challenge: Option<V2Challenge>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct V2Receipt {
    id: String,
    #[serde(deserialize_with = "lenient_string")]
    timestamp: String,
    reward: f64,
}

impl From<V2Receipt> for SolutionReceipt {
    fn from(raw: V2Receipt) -> Self {
        Self {
            tx_hash: raw.id,
            preimage: None,
            timestamp: non_empty(raw.timestamp),
            reward: Some(raw.reward),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct V2Solution {
    pub success: bool,
    pub message: String,
    pub receipt: Option<V2Receipt>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct V2CryptoReceipt {
    #[serde(rename = "txhash")]
    tx_hash: String,
}

impl From<V2CryptoReceipt> for SolutionReceipt {
    fn from(raw: V2CryptoReceipt) -> Self {
        Self {
            tx_hash: raw.tx_hash,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct V2SolutionSubmit {
    #[serde(rename = "cryptoreceipt")]
    pub crypto_receipt: Option<V2CryptoReceipt>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct V2Rate {
    rate: f64,
    timestamp: i64,
}

impl From<V2Rate> for WorkRate {
    fn from(raw: V2Rate) -> Self {
        Self {
            rate: raw.rate,
            timestamp: raw.timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Legacy document API
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct DocTerms {
    version: String,
    content: String,
    message: String,
}

impl From<DocTerms> for Terms {
    fn from(doc: DocTerms) -> Self {
        Self {
            version: doc.version,
            terms: doc.content,
            message: doc.message,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct DocRegistrationReceipt {
    #[serde(deserialize_with = "lenient_string")]
    pub preimage: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct DocRegister {
    #[serde(rename = "registrationreceipt")]
    pub registration_receipt: Option<DocRegistrationReceipt>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct DocChallenge {
    #[serde(deserialize_with = "lenient_string")]
    challenge_id: String,
    #[serde(deserialize_with = "lenient_string")]
    difficulty: String,
    #[serde(deserialize_with = "lenient_string")]
    no_pre_mine: String,
    #[serde(deserialize_with = "lenient_string")]
    no_pre_mine_hour: String,
    #[serde(deserialize_with = "lenient_string")]
    latest_submission: String,
    day: Option<u32>,
    challenge_number: Option<u32>,
}

impl From<DocChallenge> for Challenge {
    fn from(doc: DocChallenge) -> Self {
        Self {
            challenge_id: doc.challenge_id,
            // The legacy document carries no payload to hash
            payload: String::new(),
            difficulty: Difficulty::HexTarget(doc.difficulty),
            timestamp: 0,
            day: doc.day.unwrap_or(0),
            challenge_number: doc.challenge_number.unwrap_or(0),
            no_pre_mine: doc.no_pre_mine,
            no_pre_mine_hour: doc.no_pre_mine_hour,
            latest_submission: doc.latest_submission,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct DocCurrentChallenge {
    #[serde(deserialize_with = "lenient_string")]
    code: String,
    challenge: Option<DocChallenge>,
}

impl From<DocCurrentChallenge> for ChallengeResponse {
    fn from(doc: DocCurrentChallenge) -> Self {
        let status = if doc.code.trim().is_empty() {
            ChallengeStatus::Unknown
        } else {
            ChallengeStatus::from_code(&doc.code)
        };
        Self {
            status,
            challenge: doc.challenge.map(Challenge::from),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct DocCryptoReceipt {
    #[serde(deserialize_with = "lenient_string")]
    preimage: String,
    #[serde(deserialize_with = "lenient_string")]
    timestamp: String,
    #[serde(deserialize_with = "lenient_string")]
    signature: String,
}

impl From<DocCryptoReceipt> for SolutionReceipt {
    fn from(doc: DocCryptoReceipt) -> Self {
        let tx_hash = if doc.signature.is_empty() {
            "ok".to_string()
        } else {
            doc.signature
        };
        Self {
            tx_hash,
            preimage: non_empty(doc.preimage),
            timestamp: non_empty(doc.timestamp),
            reward: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct DocSolution {
    pub crypto_receipt: Option<DocCryptoReceipt>,
}

/// Recursively lower-case object keys so decoding ignores key case.
pub(crate) fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), lowercase_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}

/// Accept strings, numbers and booleans for fields documented as strings.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> T {
        serde_json::from_value(lowercase_keys(value)).unwrap()
    }

    #[test]
    fn test_legacy_challenge_normalization() {
        let doc: DocCurrentChallenge = decode(json!({
            "code": "active",
            "challenge": {
                "challenge_id": "218",
                "difficulty": "000a1b",
                "no_pre_mine": "e8a1",
                "no_pre_mine_hour": 12,
                "latest_submission": "2025-10-30T12:00:00Z",
                "day": 12,
                "challenge_number": 3
            }
        }));
        let response = ChallengeResponse::from(doc);

        assert_eq!(response.status, ChallengeStatus::Active);
        let challenge = response.challenge.unwrap();
        assert_eq!(challenge.challenge_id, "218");
        assert_eq!(challenge.day, 12);
        assert_eq!(challenge.challenge_number, 3);
        assert_eq!(challenge.difficulty, Difficulty::HexTarget("000a1b".into()));
        assert_eq!(challenge.difficulty_bits(), 12);
        assert_eq!(challenge.no_pre_mine_hour, "12");
        assert!(challenge.payload.is_empty());
    }

    #[test]
    fn test_difficulty_bits_estimation() {
        assert_eq!(Difficulty::HexTarget("00ab".into()).bits(), 8);
        assert_eq!(Difficulty::HexTarget("ab00".into()).bits(), 0);
        assert_eq!(Difficulty::Bits(20).bits(), 20);
        assert_eq!(Difficulty::Bits(20).hex(), None);
    }

    #[test]
    fn test_versioned_keys_are_case_insensitive() {
        let raw: V2CurrentChallenge = decode(json!({
            "Code": "active",
            "Challenge": { "ChallengeId": "c1", "challenge": "abc", "Difficulty": 12, "timestamp": 7 }
        }));
        let response = ChallengeResponse::from(raw);
        let challenge = response.active_challenge().unwrap();

        assert_eq!(challenge.challenge_id, "c1");
        assert_eq!(challenge.payload, "abc");
        assert_eq!(challenge.difficulty, Difficulty::Bits(12));
        assert_eq!(challenge.timestamp, 7);
    }

    #[test]
    fn test_negative_versioned_difficulty_clamps_to_zero() {
        let raw: V2Challenge = decode(json!({ "challengeId": "c", "difficulty": -4 }));
        assert_eq!(Challenge::from(raw).difficulty_bits(), 0);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ChallengeStatus::from_code("ACTIVE"), ChallengeStatus::Active);
        assert_eq!(ChallengeStatus::from_code("before"), ChallengeStatus::Before);
        assert_eq!(ChallengeStatus::from_code("after"), ChallengeStatus::After);
        assert_eq!(ChallengeStatus::from_code("paused"), ChallengeStatus::Unknown);
        assert_eq!(ChallengeStatus::Error.to_string(), "error");
    }

    #[test]
    fn test_inactive_schedule_has_no_active_challenge() {
        let response = ChallengeResponse {
            status: ChallengeStatus::Before,
            challenge: Some(Challenge::default()),
        };
        assert!(response.active_challenge().is_none());
    }

    #[test]
    fn test_terms_signable_message() {
        let terms = Terms {
            version: "1".into(),
            terms: "body".into(),
            message: String::new(),
        };
        assert_eq!(terms.signable_message(), "body");
        assert!(!terms.is_empty());
        assert!(Terms::default().is_empty());
    }

    #[test]
    fn test_legacy_crypto_receipt() {
        let doc: DocSolution = decode(json!({
            "crypto_receipt": { "preimage": "p", "timestamp": 1700000000, "signature": "sig" }
        }));
        let receipt = SolutionReceipt::from(doc.crypto_receipt.unwrap());

        assert_eq!(receipt.tx_hash, "sig");
        assert_eq!(receipt.preimage.as_deref(), Some("p"));
        assert_eq!(receipt.timestamp.as_deref(), Some("1700000000"));
    }
}
