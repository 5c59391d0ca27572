//! Multi-identity mining orchestration
//!
//! The orchestrator is the only component that moves identities through
//! their lifecycle. It keeps a registry of identities that are currently
//! mining, runs batch operations under a concurrency bound and re-broadcasts
//! every worker event tagged with its identity.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MiningConfig;
use crate::events::{IdentityEvent, MinerEvent};
use crate::identity::{Identity, IdentityId, LifecycleEvent, TransitionError};
use crate::rpc::{Challenge, ChallengeStatus, ProtocolClient, ProtocolError};
use crate::store::{IdentityStore, StoreError};
use crate::summary::{format_elapsed, ChallengeSummary};
use crate::wallet::{WalletError, WalletProvisioner};
use crate::worker::{MiningWorker, WorkerIdentity, WorkerSettings};

const EVENT_CAPACITY: usize = 1024;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Identity {0} is already mining")]
    AlreadyMining(IdentityId),

    #[error("Identity {0} is not registered")]
    NotRegistered(IdentityId),

    #[error("Identity {0} has no wallet address")]
    NoWallet(IdentityId),

    #[error("No active challenge (status: {0})")]
    NoActiveChallenge(ChallengeStatus),

    #[error("Registration rejected for identity {0}")]
    RegistrationRejected(IdentityId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Identities processed at once by a batch call
    pub batch_concurrency: usize,
    pub worker: WorkerSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&MiningConfig::default())
    }
}

impl From<&MiningConfig> for OrchestratorSettings {
    fn from(config: &MiningConfig) -> Self {
        Self {
            batch_concurrency: config.batch_concurrency,
            worker: config.worker_settings(),
        }
    }
}

/// Per-identity outcome of a batch call
#[derive(Debug)]
pub struct BatchReport {
    pub operation: &'static str,
    pub outcomes: Vec<(IdentityId, Result<(), String>)>,
}

impl BatchReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (IdentityId, &str)> {
        self.outcomes
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (*id, e.as_str())))
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} succeeded",
            self.operation,
            self.succeeded(),
            self.attempted()
        )
    }
}

/// Registry entry of a mining identity
struct ActiveMining {
    cancel: CancellationToken,
    /// Fired once the attempt task has cleaned up
    finished: CancellationToken,
    started_at: Instant,
    thread_hint: usize,
}

type Registry = Arc<Mutex<HashMap<IdentityId, ActiveMining>>>;

pub struct MiningOrchestrator {
    client: Arc<ProtocolClient>,
    store: Arc<dyn IdentityStore>,
    wallet: Arc<dyn WalletProvisioner>,
    settings: OrchestratorSettings,
    active: Registry,
    events: broadcast::Sender<IdentityEvent>,
}

impl MiningOrchestrator {
    pub fn new(
        client: Arc<ProtocolClient>,
        store: Arc<dyn IdentityStore>,
        wallet: Arc<dyn WalletProvisioner>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            client,
            store,
            wallet,
            settings,
            active: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }

    pub fn store(&self) -> &dyn IdentityStore {
        self.store.as_ref()
    }

    /// Receive every progress and completion event from now on
    pub fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }

    pub async fn is_mining(&self, id: IdentityId) -> bool {
        self.active.lock().await.contains_key(&id)
    }

    pub async fn active_ids(&self) -> Vec<IdentityId> {
        let mut ids: Vec<_> = self.active.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    // -----------------------------------------------------------------------
    // Mining
    // -----------------------------------------------------------------------

    /// Launch one mining attempt against the current global challenge.
    pub async fn start_mining(
        &self,
        identity: &Identity,
        thread_hint: usize,
    ) -> Result<(), OrchestratorError> {
        let id = identity.id;
        let (cancel, finished) = self.reserve(id, thread_hint).await?;

        match self.launch(identity, thread_hint, cancel).await {
            Ok(task) => {
                tokio::spawn(run_attempt(task, self.active.clone(), finished));
                Ok(())
            }
            Err(e) => {
                self.active.lock().await.remove(&id);
                finished.cancel();
                warn!(identity = id, error = %e, "could not start mining");
                Err(e)
            }
        }
    }

    /// Cancel an identity's attempt and wait for it to wind down.
    ///
    /// Returns false when the identity was not mining.
    pub async fn stop_mining(&self, id: IdentityId) -> bool {
        let handles = {
            let active = self.active.lock().await;
            active
                .get(&id)
                .map(|entry| (entry.cancel.clone(), entry.finished.clone()))
        };
        let Some((cancel, finished)) = handles else {
            debug!(identity = id, "not mining, nothing to stop");
            return false;
        };

        info!(identity = id, "stopping mining");
        cancel.cancel();
        finished.cancelled().await;
        true
    }

    /// Wait until the identity's current attempt, if any, has released its
    /// registry slot.
    pub async fn wait_idle(&self, id: IdentityId) {
        let finished = {
            let active = self.active.lock().await;
            active.get(&id).map(|entry| entry.finished.clone())
        };
        if let Some(finished) = finished {
            finished.cancelled().await;
        }
    }

    /// Stop every running attempt; returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let handles: Vec<_> = {
            let active = self.active.lock().await;
            active
                .values()
                .map(|entry| (entry.cancel.clone(), entry.finished.clone()))
                .collect()
        };
        if handles.is_empty() {
            return 0;
        }

        info!(count = handles.len(), "stopping all mining");
        for (cancel, _) in &handles {
            cancel.cancel();
        }
        join_all(handles.iter().map(|(_, finished)| finished.cancelled())).await;
        handles.len()
    }

    /// Time spent on the current attempt as `HH:MM:SS`
    pub async fn mining_elapsed_text(&self, id: IdentityId) -> String {
        match self.active.lock().await.get(&id) {
            Some(entry) => format_elapsed(entry.started_at.elapsed()),
            None => format_elapsed(std::time::Duration::ZERO),
        }
    }

    pub async fn build_challenge_summary(&self) -> ChallengeSummary {
        let response = self.client.fetch_current_challenge().await;
        ChallengeSummary::from_response(&response, Utc::now())
    }

    async fn reserve(
        &self,
        id: IdentityId,
        thread_hint: usize,
    ) -> Result<(CancellationToken, CancellationToken), OrchestratorError> {
        let mut active = self.active.lock().await;
        if active.contains_key(&id) {
            warn!(identity = id, "already mining");
            return Err(OrchestratorError::AlreadyMining(id));
        }
        let entry = ActiveMining {
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            started_at: Instant::now(),
            thread_hint,
        };
        let tokens = (entry.cancel.clone(), entry.finished.clone());
        active.insert(id, entry);
        Ok(tokens)
    }

    async fn launch(
        &self,
        identity: &Identity,
        thread_hint: usize,
        cancel: CancellationToken,
    ) -> Result<AttemptTask, OrchestratorError> {
        let id = identity.id;
        if !identity.registered {
            return Err(OrchestratorError::NotRegistered(id));
        }

        let response = self.client.fetch_current_challenge().await;
        let challenge = response
            .active_challenge()
            .cloned()
            .ok_or(OrchestratorError::NoActiveChallenge(response.status))?;

        let mut identity = identity.clone();
        identity.apply(LifecycleEvent::MiningStarted)?;
        if let Err(e) = self.store.update(&identity).await {
            warn!(identity = id, error = %e, "could not persist mining state");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = MiningWorker::new(
            self.client.clone(),
            WorkerIdentity::from(&identity),
            self.settings.worker.clone(),
            tx,
        );
        info!(
            identity = id,
            worker_id = %worker.worker_id(),
            challenge_id = %challenge.challenge_id,
            difficulty_bits = challenge.difficulty_bits(),
            thread_hint,
            "mining started"
        );

        Ok(AttemptTask {
            store: self.store.clone(),
            events: self.events.clone(),
            base_hashes: identity.total_hashes,
            identity,
            worker,
            challenge,
            rx,
            cancel,
        })
    }

    // -----------------------------------------------------------------------
    // Identity lifecycle
    // -----------------------------------------------------------------------

    /// Provision the identity's wallet.
    pub async fn initialize_identity(&self, id: IdentityId) -> Result<Identity, OrchestratorError> {
        let mut identity = self.store.get(id).await?;
        self.transition(&mut identity, LifecycleEvent::BeginInit).await?;

        match self.wallet.provision(&identity).await {
            Ok(address) => {
                identity.wallet_address = address;
                self.transition(&mut identity, LifecycleEvent::InitSucceeded)
                    .await?;
                info!(identity = id, address = %identity.wallet_address, "identity initialized");
                Ok(identity)
            }
            Err(e) => {
                error!(identity = id, error = %e, "initialization failed");
                self.transition(&mut identity, LifecycleEvent::InitFailed)
                    .await?;
                Err(e.into())
            }
        }
    }

    /// Sign the current terms and register the identity's address.
    pub async fn register_identity(&self, id: IdentityId) -> Result<Identity, OrchestratorError> {
        let mut identity = self.store.get(id).await?;
        if !identity.has_wallet() {
            return Err(OrchestratorError::NoWallet(id));
        }

        let terms = self.client.fetch_terms().await?;
        let credentials = self
            .wallet
            .sign(&identity, terms.signable_message())
            .await?;
        let receipt = self
            .client
            .register_with_terms(
                &credentials.address,
                &credentials.signature,
                &credentials.public_key,
                &terms,
            )
            .await
            .ok_or(OrchestratorError::RegistrationRejected(id))?;

        identity.record_registration(&credentials, &receipt);
        self.store.update(&identity).await?;
        info!(identity = id, worker_id = %identity.worker_id, "identity registered");
        Ok(identity)
    }

    /// Open the identity's wallet session.
    pub async fn start_identity(&self, id: IdentityId) -> Result<Identity, OrchestratorError> {
        let mut identity = self.store.get(id).await?;
        self.transition(&mut identity, LifecycleEvent::Start).await?;

        if let Err(e) = self.wallet.open(&identity).await {
            error!(identity = id, error = %e, "could not open wallet session");
            self.transition(&mut identity, LifecycleEvent::StartFailed)
                .await?;
            return Err(e.into());
        }
        info!(identity = id, "identity running");
        Ok(identity)
    }

    /// Stop mining and close the wallet session.
    pub async fn close_identity(&self, id: IdentityId) -> Result<Identity, OrchestratorError> {
        self.stop_mining(id).await;

        let mut identity = self.store.get(id).await?;
        self.wallet.close(&identity).await?;
        self.transition(&mut identity, LifecycleEvent::Close).await?;
        info!(identity = id, "identity closed");
        Ok(identity)
    }

    async fn transition(
        &self,
        identity: &mut Identity,
        event: LifecycleEvent,
    ) -> Result<(), OrchestratorError> {
        let from = identity.state;
        identity.apply(event)?;
        debug!(identity = identity.id, %from, to = %identity.state, ?event, "state change");
        self.store.update(identity).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Batches
    // -----------------------------------------------------------------------

    pub async fn initialize_many(&self, ids: &[IdentityId]) -> BatchReport {
        self.run_batch("initialize", ids, |id| async move {
            self.initialize_identity(id).await.map(drop)
        })
        .await
    }

    pub async fn register_many(&self, ids: &[IdentityId]) -> BatchReport {
        self.run_batch("register", ids, |id| async move {
            self.register_identity(id).await.map(drop)
        })
        .await
    }

    pub async fn start_many(&self, ids: &[IdentityId]) -> BatchReport {
        self.run_batch("start", ids, |id| async move {
            self.start_identity(id).await.map(drop)
        })
        .await
    }

    pub async fn close_many(&self, ids: &[IdentityId]) -> BatchReport {
        self.run_batch("close", ids, |id| async move {
            self.close_identity(id).await.map(drop)
        })
        .await
    }

    pub async fn start_mining_many(&self, ids: &[IdentityId], thread_hint: usize) -> BatchReport {
        self.run_batch("start_mining", ids, |id| async move {
            let identity = self.store.get(id).await?;
            self.start_mining(&identity, thread_hint).await
        })
        .await
    }

    async fn run_batch<F, Fut>(&self, operation: &'static str, ids: &[IdentityId], op: F) -> BatchReport
    where
        F: Fn(IdentityId) -> Fut,
        Fut: Future<Output = Result<(), OrchestratorError>>,
    {
        let semaphore = Semaphore::new(self.settings.batch_concurrency.max(1));
        let semaphore = &semaphore;
        let op = &op;

        info!(operation, count = ids.len(), "batch started");
        let outcomes = join_all(ids.iter().copied().map(|id| async move {
            let result = match semaphore.acquire().await {
                Ok(_permit) => op(id).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(e) = &result {
                warn!(operation, identity = id, error = %e, "batch item failed");
            }
            (id, result)
        }))
        .await;

        let report = BatchReport {
            operation,
            outcomes,
        };
        info!(
            operation,
            succeeded = report.succeeded(),
            attempted = report.attempted(),
            "batch finished"
        );
        report
    }
}

/// Everything an attempt task owns
struct AttemptTask {
    store: Arc<dyn IdentityStore>,
    events: broadcast::Sender<IdentityEvent>,
    identity: Identity,
    base_hashes: u64,
    worker: MiningWorker,
    challenge: Challenge,
    rx: mpsc::UnboundedReceiver<MinerEvent>,
    cancel: CancellationToken,
}

async fn run_attempt(task: AttemptTask, active: Registry, finished: CancellationToken) {
    let AttemptTask {
        store,
        events,
        mut identity,
        base_hashes,
        worker,
        challenge,
        mut rx,
        cancel,
    } = task;
    let id = identity.id;

    let (completed, ()) = tokio::join!(
        worker.attempt(&challenge, &cancel),
        forward_progress(id, base_hashes, &mut rx, &events, store.as_ref()),
    );

    identity.total_hashes = base_hashes + completed.total_hashes;
    if completed.success {
        identity.solutions_found += 1;
    }
    if let Err(e) = identity.apply(LifecycleEvent::MiningFinished) {
        warn!(identity = id, error = %e, "unexpected state after mining");
    }

    // Merge into the latest stored record; other fields may have changed
    let mut record = match store.get(id).await {
        Ok(record) => record,
        Err(_) => identity.clone(),
    };
    record.state = identity.state;
    record.mining = false;
    record.total_hashes = identity.total_hashes;
    record.solutions_found = identity.solutions_found;
    record.touch();
    if let Err(e) = store.update(&record).await {
        error!(identity = id, error = %e, "could not persist identity after mining");
    }

    let _ = events.send(IdentityEvent {
        identity_id: id,
        event: MinerEvent::Completed(completed),
    });

    if let Some(entry) = active.lock().await.remove(&id) {
        debug!(
            identity = id,
            thread_hint = entry.thread_hint,
            elapsed = %format_elapsed(entry.started_at.elapsed()),
            "mining slot released"
        );
    }
    finished.cancel();
}

/// Re-broadcast progress and mirror the running hash count into the stored
/// record until the attempt reports completion.
///
/// Progress arrives at most once per progress interval, which also bounds the
/// store writes.
async fn forward_progress(
    id: IdentityId,
    base_hashes: u64,
    rx: &mut mpsc::UnboundedReceiver<MinerEvent>,
    events: &broadcast::Sender<IdentityEvent>,
    store: &dyn IdentityStore,
) {
    while let Some(event) = rx.recv().await {
        match event {
            MinerEvent::Progress(progress) => {
                mirror_hashes(store, id, base_hashes + progress.hash_count).await;
                let _ = events.send(IdentityEvent {
                    identity_id: id,
                    event: MinerEvent::Progress(progress),
                });
            }
            MinerEvent::Completed(_) => break,
        }
    }
}

async fn mirror_hashes(store: &dyn IdentityStore, id: IdentityId, total_hashes: u64) {
    let mut record = match store.get(id).await {
        Ok(record) => record,
        Err(e) => {
            debug!(identity = id, error = %e, "identity gone, progress not mirrored");
            return;
        }
    };
    record.total_hashes = total_hashes;
    record.touch();
    if let Err(e) = store.update(&record).await {
        warn!(identity = id, error = %e, "could not persist mining progress");
    }
}
