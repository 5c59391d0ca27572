//! Operator-facing view of the global challenge

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::rpc::{ChallengeResponse, ChallengeStatus};

/// Shown wherever there is nothing to say
pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DifficultyCategory {
    Easy,
    Medium,
    Hard,
}

impl DifficultyCategory {
    pub fn from_bits(bits: u32) -> Self {
        match bits {
            0..=16 => Self::Easy,
            17..=32 => Self::Medium,
            _ => Self::Hard,
        }
    }
}

impl fmt::Display for DifficultyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Easy => "Easy",
            Self::Medium => "Medium",
            Self::Hard => "Hard",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeSummary {
    pub status: ChallengeStatus,
    pub challenge_id: String,
    pub day: u32,
    pub challenge_number: u32,
    pub difficulty_hex: String,
    pub difficulty_bits: u32,
    /// Unset when no challenge was issued
    pub difficulty_category: Option<DifficultyCategory>,
    pub latest_submission_raw: String,
    pub latest_submission_age: String,
    pub next_challenge_in: String,
    pub miner_status: &'static str,
}

impl ChallengeSummary {
    pub fn from_response(response: &ChallengeResponse, now: DateTime<Utc>) -> Self {
        let mut summary = Self::empty(response.status);

        if let Some(challenge) = &response.challenge {
            let bits = challenge.difficulty_bits();
            summary.challenge_id = challenge.challenge_id.clone();
            summary.day = challenge.day;
            summary.challenge_number = challenge.challenge_number;
            summary.difficulty_hex = challenge.difficulty.hex().unwrap_or_default().to_string();
            summary.difficulty_bits = bits;
            summary.difficulty_category = Some(DifficultyCategory::from_bits(bits));
            summary.latest_submission_raw = challenge.latest_submission.clone();
            summary.latest_submission_age = submission_age(&challenge.latest_submission, now);
        }

        summary
    }

    pub fn error() -> Self {
        Self::empty(ChallengeStatus::Error)
    }

    fn empty(status: ChallengeStatus) -> Self {
        Self {
            status,
            challenge_id: String::new(),
            day: 0,
            challenge_number: 0,
            difficulty_hex: String::new(),
            difficulty_bits: 0,
            difficulty_category: None,
            latest_submission_raw: String::new(),
            latest_submission_age: NOT_AVAILABLE.to_string(),
            next_challenge_in: NOT_AVAILABLE.to_string(),
            miner_status: if status == ChallengeStatus::Active {
                "ACTIVE"
            } else {
                "INACTIVE"
            },
        }
    }
}

/// Coarse age of a timestamp: `"3d ago"`, `"5h ago"`, `"12m ago"`.
///
/// Empty input gives `N/A`; input that is not a timestamp is echoed.
pub fn submission_age(raw: &str, now: DateTime<Utc>) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return NOT_AVAILABLE.to_string();
    }
    let Some(then) = parse_timestamp(trimmed) else {
        return raw.to_string();
    };

    let age = now.signed_duration_since(then);
    if age.num_days() >= 1 {
        format!("{}d ago", age.num_days())
    } else if age.num_hours() >= 1 {
        format!("{}h ago", age.num_hours())
    } else {
        format!("{}m ago", age.num_minutes().max(0))
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// `HH:MM:SS` for a running duration
pub fn format_elapsed(elapsed: std::time::Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
