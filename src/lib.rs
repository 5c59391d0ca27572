//! Scavenger Prover Library
//!
//! Mines the Scavenger reward service with many identities at once.
//!
//! # Overview
//!
//! Each identity owns a wallet address registered with the service. The
//! [`orchestrator::MiningOrchestrator`] walks identities through their
//! lifecycle (initialize, register, start, mine, close), runs one
//! [`worker::MiningWorker`] per mining identity and re-broadcasts worker
//! events. All network access goes through [`rpc::ProtocolClient`], which
//! falls back from the versioned API to the legacy one.
//!
//! # Example
//!
//! ```rust
//! use scavenger::puzzle::{compute_digest, is_valid};
//!
//! // Difficulty 0 accepts the very first nonce
//! let digest = compute_digest("challenge payload", "0");
//! assert!(is_valid(&digest, 0));
//! ```

// Re-export the puzzle core
pub use scavenger_core as puzzle;

pub mod config;
pub mod events;
pub mod identity;
pub mod orchestrator;
pub mod rpc;
pub mod store;
pub mod summary;
pub mod wallet;
pub mod worker;

#[cfg(test)]
mod testing;

// Convenience re-exports
pub use config::MinerConfig;
pub use identity::{Identity, IdentityState};
pub use orchestrator::{BatchReport, MiningOrchestrator, OrchestratorError};
pub use puzzle::{compute_digest, is_valid};
