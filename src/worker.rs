//! Nonce search for a single identity
//!
//! A [`MiningWorker`] scans nonces `0, 1, 2, ...` (as decimal strings) until
//! one meets the challenge target or its cancellation token fires. The search
//! yields to the runtime every [`YIELD_INTERVAL`] nonces so cancellation and
//! progress forwarding stay responsive.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{MinerEvent, MiningCompleted, MiningProgress, CANCELLED};
use crate::identity::Identity;
use crate::puzzle::{digest_value, Target};
use crate::rpc::{Challenge, ProtocolClient, SolutionReceipt};

/// Nonces tried between cooperative yields
pub const YIELD_INTERVAL: u64 = 1000;

/// Pacing of the worker loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Wait before retrying after a failed challenge fetch
    pub challenge_retry_delay: Duration,
    /// Pause between attempts in the continuous loop
    pub solution_delay: Duration,
    pub progress_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            challenge_retry_delay: Duration::from_secs(5),
            solution_delay: Duration::from_secs(1),
            progress_interval: Duration::from_secs(1),
        }
    }
}

/// Credentials a worker mines and submits with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub worker_id: String,
    pub wallet_address: String,
    pub public_key: String,
    pub signature: String,
}

impl From<&Identity> for WorkerIdentity {
    fn from(identity: &Identity) -> Self {
        Self {
            worker_id: identity.effective_worker_id().to_string(),
            wallet_address: identity.wallet_address.clone(),
            public_key: identity.public_key.clone(),
            signature: identity.signature.clone(),
        }
    }
}

/// Where a found nonce gets submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmitRoute {
    /// Global challenge, signed by the wallet
    Global,
    /// Challenge assigned to this worker
    WorkerScoped,
}

struct WorkerCore {
    client: Arc<ProtocolClient>,
    identity: WorkerIdentity,
    settings: WorkerSettings,
    events: UnboundedSender<MinerEvent>,
    total_hashes: AtomicU64,
}

pub struct MiningWorker {
    core: Arc<WorkerCore>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MiningWorker {
    pub fn new(
        client: Arc<ProtocolClient>,
        identity: WorkerIdentity,
        settings: WorkerSettings,
        events: UnboundedSender<MinerEvent>,
    ) -> Self {
        Self {
            core: Arc::new(WorkerCore {
                client,
                identity,
                settings,
                events,
                total_hashes: AtomicU64::new(0),
            }),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.core.identity.worker_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Hashes computed since the last reset
    pub fn total_hashes(&self) -> u64 {
        self.core.total_hashes.load(Ordering::Relaxed)
    }

    /// Start the continuous fetch/search/submit loop in the background.
    pub fn start(&mut self) {
        if self.is_running() {
            warn!(worker_id = %self.worker_id(), "worker already running");
            return;
        }
        self.core.total_hashes.store(0, Ordering::Relaxed);
        self.cancel = CancellationToken::new();
        self.running.store(true, Ordering::SeqCst);

        let core = self.core.clone();
        let running = self.running.clone();
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(async move {
            core.run(&cancel).await;
            running.store(false, Ordering::SeqCst);
        }));
        info!(worker_id = %self.worker_id(), "worker started");
    }

    /// Cancel the loop and wait for it to finish.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            warn!(worker_id = %self.worker_id(), "worker is not running");
            return;
        };
        self.cancel.cancel();
        if let Err(e) = task.await {
            warn!(worker_id = %self.worker_id(), error = %e, "worker task ended abnormally");
        }
        self.running.store(false, Ordering::SeqCst);
        info!(worker_id = %self.worker_id(), "worker stopped");
    }

    /// Search for a nonce meeting the challenge's difficulty.
    ///
    /// Returns `None` once `cancel` fires.
    pub async fn find_nonce(&self, challenge: &Challenge, cancel: &CancellationToken) -> Option<String> {
        self.core.find_nonce(challenge, cancel).await
    }

    /// One search without submission, raising exactly one completion event.
    pub async fn mine_once(&self, challenge: &Challenge, cancel: &CancellationToken) -> Option<String> {
        self.core.total_hashes.store(0, Ordering::Relaxed);
        let worker_id = self.worker_id();
        let started = Instant::now();

        let found = self.core.find_nonce(challenge, cancel).await;
        let hashes = self.total_hashes();
        let completed = match &found {
            Some(nonce) => MiningCompleted {
                worker_id: worker_id.to_string(),
                success: true,
                nonce: Some(nonce.clone()),
                total_hashes: hashes,
                duration: started.elapsed(),
                error_message: None,
                receipt: None,
            },
            None if cancel.is_cancelled() => {
                MiningCompleted::failed(worker_id, None, CANCELLED, hashes, started.elapsed())
            }
            None => MiningCompleted::failed(worker_id, None, "No nonce found", hashes, started.elapsed()),
        };
        self.core.emit(MinerEvent::Completed(completed));
        found
    }

    /// Search, submit what was found to the global challenge and raise one
    /// completion event.
    pub async fn attempt(&self, challenge: &Challenge, cancel: &CancellationToken) -> MiningCompleted {
        self.core.total_hashes.store(0, Ordering::Relaxed);
        self.core.attempt(challenge, cancel, SubmitRoute::Global).await
    }
}

impl WorkerCore {
    async fn run(&self, cancel: &CancellationToken) {
        let worker_id = self.identity.worker_id.as_str();
        info!(worker_id, "mining loop started");

        while !cancel.is_cancelled() {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => break,
                fetched = self.client.fetch_worker_challenge(worker_id) => fetched,
            };
            let challenge = match fetched {
                Ok(challenge) => challenge,
                Err(e) => {
                    warn!(
                        worker_id,
                        error = %e,
                        retry_in = ?self.settings.challenge_retry_delay,
                        "could not fetch challenge"
                    );
                    if pause(self.settings.challenge_retry_delay, cancel).await {
                        break;
                    }
                    continue;
                }
            };
            info!(
                worker_id,
                challenge_id = %challenge.challenge_id,
                difficulty_bits = challenge.difficulty_bits(),
                "received challenge"
            );

            self.attempt(&challenge, cancel, SubmitRoute::WorkerScoped).await;
            if pause(self.settings.solution_delay, cancel).await {
                break;
            }
        }

        info!(worker_id, "mining loop stopped");
    }

    async fn attempt(
        &self,
        challenge: &Challenge,
        cancel: &CancellationToken,
        route: SubmitRoute,
    ) -> MiningCompleted {
        let worker_id = self.identity.worker_id.as_str();
        let started = Instant::now();
        let hashes_before = self.total_hashes.load(Ordering::Relaxed);

        let found = self.find_nonce(challenge, cancel).await;
        let hashes = || {
            self.total_hashes
                .load(Ordering::Relaxed)
                .saturating_sub(hashes_before)
        };

        let completed = match found {
            None if cancel.is_cancelled() => {
                MiningCompleted::failed(worker_id, None, CANCELLED, hashes(), started.elapsed())
            }
            None => MiningCompleted::failed(
                worker_id,
                None,
                "No nonce found",
                hashes(),
                started.elapsed(),
            ),
            Some(nonce) => {
                let receipt = self.submit(route, challenge, &nonce).await;
                match receipt {
                    Some(receipt) => MiningCompleted::accepted(
                        worker_id,
                        nonce,
                        receipt,
                        hashes(),
                        started.elapsed(),
                    ),
                    None => MiningCompleted::failed(
                        worker_id,
                        Some(nonce),
                        "Solution rejected",
                        hashes(),
                        started.elapsed(),
                    ),
                }
            }
        };

        info!(
            worker_id,
            success = completed.success,
            nonce = completed.nonce.as_deref().unwrap_or("-"),
            hashes = completed.total_hashes,
            elapsed_ms = completed.duration.as_millis() as u64,
            "attempt finished"
        );
        self.emit(MinerEvent::Completed(completed.clone()));
        completed
    }

    async fn submit(&self, route: SubmitRoute, challenge: &Challenge, nonce: &str) -> Option<SolutionReceipt> {
        let identity = &self.identity;
        match route {
            SubmitRoute::Global => {
                self.client
                    .submit_solution(
                        nonce,
                        &identity.wallet_address,
                        &identity.public_key,
                        &identity.signature,
                    )
                    .await
            }
            SubmitRoute::WorkerScoped => {
                self.client
                    .submit_worker_solution(
                        &identity.worker_id,
                        &challenge.challenge_id,
                        nonce,
                        &identity.wallet_address,
                    )
                    .await
            }
        }
    }

    async fn find_nonce(&self, challenge: &Challenge, cancel: &CancellationToken) -> Option<String> {
        let worker_id = self.identity.worker_id.as_str();
        let target = Target::from_bits(challenge.difficulty_bits());
        let started = Instant::now();
        let mut last_progress = started;
        let mut searched: u64 = 0;
        let mut nonce: u64 = 0;

        debug!(worker_id, difficulty_bits = target.bits(), "searching");

        loop {
            if cancel.is_cancelled() {
                debug!(worker_id, searched, "search cancelled");
                return None;
            }

            let candidate = nonce.to_string();
            let value = digest_value(&challenge.payload, &candidate);
            let hash_count = self.total_hashes.fetch_add(1, Ordering::Relaxed) + 1;
            searched += 1;

            if target.is_met_by(value) {
                info!(worker_id, nonce = %candidate, searched, "found nonce");
                return Some(candidate);
            }

            let now = Instant::now();
            if now.duration_since(last_progress) >= self.settings.progress_interval {
                let elapsed = now.duration_since(started).as_secs_f64();
                self.emit(MinerEvent::Progress(MiningProgress {
                    worker_id: worker_id.to_string(),
                    hash_count,
                    hash_rate: searched as f64 / elapsed.max(f64::EPSILON),
                    current_nonce: candidate,
                }));
                last_progress = now;
            }

            nonce = match nonce.checked_add(1) {
                Some(next) => next,
                None => {
                    warn!(worker_id, "nonce space exhausted");
                    return None;
                }
            };
            if nonce % YIELD_INTERVAL == 0 {
                tokio::task::yield_now().await;
            }
        }
    }

    fn emit(&self, event: MinerEvent) {
        if self.events.send(event).is_err() {
            debug!(worker_id = %self.identity.worker_id, "event receiver dropped");
        }
    }
}

/// Sleep for `delay`; returns true if cancelled first.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
