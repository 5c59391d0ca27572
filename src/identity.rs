//! Mining identities and their lifecycle
//!
//! An identity bundles a wallet address, its registration credentials and
//! mining counters. Its [`IdentityState`] only moves through
//! [`IdentityState::on`], which rejects transitions the lifecycle does not
//! allow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::rpc::RegistrationReceipt;
use crate::wallet::WalletCredentials;

pub type IdentityId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityState {
    NotInitialized,
    Initializing,
    Initialized,
    InitError,
    NotStarted,
    Running,
    Mining,
    Stopped,
}

/// Things that happen to an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    BeginInit,
    InitSucceeded,
    InitFailed,
    Start,
    StartFailed,
    MiningStarted,
    MiningFinished,
    Close,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot apply {event:?} to an identity in state {from}")]
pub struct TransitionError {
    pub from: IdentityState,
    pub event: LifecycleEvent,
}

impl IdentityState {
    /// Next state after `event`, or an error if the lifecycle forbids it.
    pub fn on(self, event: LifecycleEvent) -> Result<IdentityState, TransitionError> {
        use IdentityState::*;
        use LifecycleEvent::*;

        let next = match (self, event) {
            (NotInitialized | InitError | Initialized | NotStarted | Stopped, BeginInit) => {
                Initializing
            }
            (Initializing, InitSucceeded) => Initialized,
            (Initializing, InitFailed) => InitError,
            (Initialized | NotStarted | Stopped, Start) => Running,
            (Running, StartFailed) => Stopped,
            (Initialized | NotStarted | Running | Stopped, MiningStarted) => Mining,
            (Mining | Running | Stopped, MiningFinished) => Running,
            (Initialized | NotStarted | Running | Mining | Stopped, Close) => Stopped,
            (from, event) => return Err(TransitionError { from, event }),
        };
        Ok(next)
    }

    /// Operator-facing label
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotInitialized => "Not initialized",
            Self::Initializing => "Initializing",
            Self::Initialized => "Initialized",
            Self::InitError => "Init error",
            Self::NotStarted => "Not started",
            Self::Running => "Running",
            Self::Mining => "Mining",
            Self::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for IdentityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    pub wallet_address: String,
    pub public_key: String,
    pub signature: String,
    pub registered: bool,
    pub registration_receipt: String,
    pub worker_id: String,
    pub state: IdentityState,
    pub mining: bool,
    pub total_hashes: u64,
    pub solutions_found: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(id: IdentityId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            wallet_address: String::new(),
            public_key: String::new(),
            signature: String::new(),
            registered: false,
            registration_receipt: String::new(),
            worker_id: String::new(),
            state: IdentityState::NotInitialized,
            mining: false,
            total_hashes: 0,
            solutions_found: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_wallet(&self) -> bool {
        !self.wallet_address.trim().is_empty()
    }

    /// Worker id used with the service, defaulting to the wallet address
    pub fn effective_worker_id(&self) -> &str {
        if self.worker_id.trim().is_empty() {
            &self.wallet_address
        } else {
            &self.worker_id
        }
    }

    /// Apply a lifecycle event in place.
    pub fn apply(&mut self, event: LifecycleEvent) -> Result<(), TransitionError> {
        self.state = self.state.on(event)?;
        self.mining = self.state == IdentityState::Mining;
        self.touch();
        Ok(())
    }

    /// Store the credentials and receipt of a successful registration.
    ///
    /// An already assigned worker id is kept.
    pub fn record_registration(
        &mut self,
        credentials: &WalletCredentials,
        receipt: &RegistrationReceipt,
    ) {
        self.wallet_address = credentials.address.clone();
        self.public_key = credentials.public_key.clone();
        self.signature = credentials.signature.clone();
        self.registration_receipt = receipt.preimage.clone();
        self.registered = true;
        if self.worker_id.trim().is_empty() {
            self.worker_id = receipt.preimage.clone();
        }
        self.touch();
    }

    /// A registered identity must carry a receipt and signing material.
    pub fn registration_is_consistent(&self) -> bool {
        !self.registered
            || (!self.registration_receipt.is_empty()
                && !self.public_key.is_empty()
                && !self.signature.is_empty())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IdentityState::*;
    use LifecycleEvent::*;

    const STATES: [IdentityState; 8] = [
        NotInitialized,
        Initializing,
        Initialized,
        InitError,
        NotStarted,
        Running,
        Mining,
        Stopped,
    ];

    #[test]
    fn test_happy_path() {
        let mut state = NotInitialized;
        for (event, expected) in [
            (BeginInit, Initializing),
            (InitSucceeded, Initialized),
            (Start, Running),
            (MiningStarted, Mining),
            (MiningFinished, Running),
            (Close, Stopped),
        ] {
            state = state.on(event).unwrap();
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn test_init_failure_can_retry() {
        let state = Initializing.on(InitFailed).unwrap();
        assert_eq!(state, InitError);
        assert_eq!(state.on(BeginInit).unwrap(), Initializing);
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(NotInitialized.on(Start).is_err());
        assert!(NotInitialized.on(MiningStarted).is_err());
        assert!(Initializing.on(BeginInit).is_err());
        assert!(Mining.on(BeginInit).is_err());
        assert!(Mining.on(MiningStarted).is_err());
        assert!(InitError.on(Start).is_err());

        let err = Running.on(InitSucceeded).unwrap_err();
        assert_eq!(err.from, Running);
        assert_eq!(err.event, InitSucceeded);
    }

    #[test]
    fn test_in_progress_states_only_move_forward() {
        // Initializing only leaves through its outcome events
        for event in [BeginInit, Start, StartFailed, MiningStarted, MiningFinished, Close] {
            assert!(Initializing.on(event).is_err(), "{event:?}");
        }
    }

    #[test]
    fn test_every_rest_state_reachable_from_start() {
        // Walk the transition graph from NotInitialized
        let events = [
            BeginInit,
            InitSucceeded,
            InitFailed,
            Start,
            StartFailed,
            MiningStarted,
            MiningFinished,
            Close,
        ];
        let mut seen = vec![NotInitialized];
        let mut frontier = vec![NotInitialized];
        while let Some(state) = frontier.pop() {
            for event in events {
                if let Ok(next) = state.on(event) {
                    if !seen.contains(&next) {
                        seen.push(next);
                        frontier.push(next);
                    }
                }
            }
        }
        for state in STATES.iter().filter(|s| **s != NotStarted) {
            assert!(seen.contains(state), "{state:?} unreachable");
        }
    }

    #[test]
    fn test_apply_tracks_mining_flag() {
        let mut identity = Identity::new(1, "alpha");
        identity.state = Running;

        identity.apply(MiningStarted).unwrap();
        assert!(identity.mining);
        identity.apply(MiningFinished).unwrap();
        assert!(!identity.mining);
        assert_eq!(identity.state, Running);
    }

    #[test]
    fn test_failed_apply_leaves_state() {
        let mut identity = Identity::new(1, "alpha");
        assert!(identity.apply(Start).is_err());
        assert_eq!(identity.state, NotInitialized);
    }

    #[test]
    fn test_record_registration() {
        let mut identity = Identity::new(3, "gamma");
        let credentials = WalletCredentials {
            address: "addr3".into(),
            signature: "sig3".into(),
            public_key: "pk3".into(),
        };
        identity.record_registration(
            &credentials,
            &RegistrationReceipt {
                preimage: "abc123".into(),
            },
        );

        assert!(identity.registered);
        assert_eq!(identity.worker_id, "abc123");
        assert_eq!(identity.effective_worker_id(), "abc123");
        assert!(identity.registration_is_consistent());

        // A second receipt does not replace the worker id
        identity.record_registration(
            &credentials,
            &RegistrationReceipt {
                preimage: "zzz".into(),
            },
        );
        assert_eq!(identity.worker_id, "abc123");
        assert_eq!(identity.registration_receipt, "zzz");
    }

    #[test]
    fn test_worker_id_defaults_to_address() {
        let mut identity = Identity::new(4, "delta");
        identity.wallet_address = "addr4".into();
        assert_eq!(identity.effective_worker_id(), "addr4");
    }

    #[test]
    fn test_unregistered_is_consistent() {
        assert!(Identity::new(5, "eps").registration_is_consistent());

        let mut broken = Identity::new(6, "zeta");
        broken.registered = true;
        assert!(!broken.registration_is_consistent());
    }
}
