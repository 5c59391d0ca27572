//! Notifications raised while mining

use serde::Serialize;
use std::time::Duration;

use crate::identity::IdentityId;
use crate::rpc::SolutionReceipt;

/// Periodic search progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MiningProgress {
    pub worker_id: String,
    /// Hashes computed by the worker since its current attempt began
    pub hash_count: u64,
    /// Hashes per second over the current search
    pub hash_rate: f64,
    pub current_nonce: String,
}

/// Outcome of one mining attempt. Exactly one is raised per attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MiningCompleted {
    pub worker_id: String,
    pub success: bool,
    pub nonce: Option<String>,
    pub total_hashes: u64,
    pub duration: Duration,
    pub error_message: Option<String>,
    pub receipt: Option<SolutionReceipt>,
}

impl MiningCompleted {
    pub fn accepted(
        worker_id: &str,
        nonce: String,
        receipt: SolutionReceipt,
        total_hashes: u64,
        duration: Duration,
    ) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            success: true,
            nonce: Some(nonce),
            total_hashes,
            duration,
            error_message: None,
            receipt: Some(receipt),
        }
    }

    pub fn failed(
        worker_id: &str,
        nonce: Option<String>,
        message: impl Into<String>,
        total_hashes: u64,
        duration: Duration,
    ) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            success: false,
            nonce,
            total_hashes,
            duration,
            error_message: Some(message.into()),
            receipt: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_message.as_deref() == Some(CANCELLED)
    }
}

pub(crate) const CANCELLED: &str = "Mining cancelled";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MinerEvent {
    Progress(MiningProgress),
    Completed(MiningCompleted),
}

impl MinerEvent {
    pub fn worker_id(&self) -> &str {
        match self {
            Self::Progress(p) => &p.worker_id,
            Self::Completed(c) => &c.worker_id,
        }
    }
}

/// A worker event tagged with the identity it belongs to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityEvent {
    pub identity_id: IdentityId,
    pub event: MinerEvent,
}
