//! Client for the Scavenger mining service
//!
//! Every operation first tries the versioned `/api/v2` API and, when that
//! fails or answers with an unusable payload, falls back once to the legacy
//! document API. Failures of both are logged and surface as an empty result
//! (or an error value) rather than a panic.

mod fallback;
mod transport;
mod types;

pub use transport::{HttpTransport, Transport};
pub use types::{
    Challenge, ChallengeResponse, ChallengeStatus, Difficulty, RegistrationReceipt,
    SolutionReceipt, Terms, WorkRate,
};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use fallback::with_fallback;
use types::{
    lowercase_keys, DocCurrentChallenge, DocRegister, DocSolution, DocTerms, V2CurrentChallenge,
    V2Rate, V2Registration, V2Solution, V2SolutionSubmit, V2Terms, V2WorkerChallenge,
};

/// Default versioned API base
pub const DEFAULT_API_URL: &str = "https://api.scavenger-mine.com";

/// Default legacy API base
pub const DEFAULT_LEGACY_URL: &str = "https://scavenger.prod.gd.midnighttge.io";

/// User agent sent with every request
pub const DEFAULT_USER_AGENT: &str = "ScavengerMineSDK/1.0";

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Unusable response: {0}")]
    Rejected(String),

    #[error("No challenge id known for a legacy submission")]
    MissingChallengeId,

    #[error("{operation}: versioned endpoint failed ({primary}); legacy endpoint failed ({secondary})")]
    Exhausted {
        operation: &'static str,
        primary: String,
        secondary: String,
    },
}

/// Endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Versioned API base URL
    pub api_url: String,
    /// Legacy document API base URL
    pub legacy_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            legacy_url: DEFAULT_LEGACY_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Protocol client with versioned/legacy fallback
pub struct ProtocolClient {
    config: ApiConfig,
    transport: Arc<dyn Transport>,
    /// Id of the most recently observed challenge, used by legacy submissions
    last_challenge_id: RwLock<Option<String>>,
}

impl ProtocolClient {
    /// Create a client that talks HTTP
    pub fn new(config: ApiConfig) -> Result<Self, ProtocolError> {
        let transport = HttpTransport::new(
            &config.user_agent,
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a client over an arbitrary transport
    pub fn with_transport(config: ApiConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            last_challenge_id: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Most recently cached challenge id
    pub async fn last_challenge_id(&self) -> Option<String> {
        self.last_challenge_id.read().await.clone()
    }

    /// Fetch the current terms and conditions.
    pub async fn fetch_terms(&self) -> Result<Terms, ProtocolError> {
        with_fallback(
            "fetch_terms",
            async {
                let raw: V2Terms = self.get(self.versioned(&["api", "v2", "terms"])?).await?;
                let terms = Terms::from(raw);
                if terms.is_empty() {
                    return Err(ProtocolError::Rejected("empty terms payload".into()));
                }
                Ok(terms)
            },
            move || async move {
                let doc: DocTerms = self.get(self.legacy(&["TandC"])?).await?;
                Ok(Terms::from(doc))
            },
        )
        .await
    }

    /// Register a wallet address with the service.
    ///
    /// Returns `None` when both endpoint families refuse the registration.
    pub async fn register(
        &self,
        address: &str,
        signature: &str,
        public_key: &str,
    ) -> Option<RegistrationReceipt> {
        let terms = self.fetch_terms().await;
        if let Err(e) = &terms {
            warn!(address, error = %e, "terms unavailable, only the legacy registration can succeed");
        }
        let terms = terms.ok();
        self.register_via(address, signature, public_key, terms.as_ref())
            .await
    }

    /// Register against terms the caller already fetched and signed.
    pub async fn register_with_terms(
        &self,
        address: &str,
        signature: &str,
        public_key: &str,
        terms: &Terms,
    ) -> Option<RegistrationReceipt> {
        self.register_via(address, signature, public_key, Some(terms))
            .await
    }

    async fn register_via(
        &self,
        address: &str,
        signature: &str,
        public_key: &str,
        terms: Option<&Terms>,
    ) -> Option<RegistrationReceipt> {
        info!(address, "registering address");

        let result = with_fallback(
            "register",
            async {
                let terms =
                    terms.ok_or_else(|| ProtocolError::Rejected("terms unavailable".into()))?;
                let body = json!({
                    "address": address,
                    "signature": signature,
                    "pubkey": public_key,
                    "termsVersion": terms.version,
                });
                let raw: V2Registration = self
                    .post(self.versioned(&["api", "v2", "register"])?, body)
                    .await?;
                if !raw.success {
                    return Err(ProtocolError::Rejected(format!(
                        "registration unsuccessful: {}",
                        raw.message
                    )));
                }
                let preimage = raw
                    .worker_id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or(raw.message);
                receipt_from_preimage(preimage)
            },
            move || async move {
                let url = self.legacy(&["register", address, signature, public_key])?;
                let doc: DocRegister = self.post(url, json!({})).await?;
                let preimage = doc
                    .registration_receipt
                    .map(|receipt| receipt.preimage)
                    .unwrap_or_default();
                receipt_from_preimage(preimage)
            },
        )
        .await;

        match result {
            Ok(receipt) => {
                info!(address, "registration accepted");
                Some(receipt)
            }
            Err(e) => {
                error!(address, error = %e, "registration failed");
                None
            }
        }
    }

    /// Fetch the global challenge schedule.
    ///
    /// Never fails: when both endpoints are unusable the response carries
    /// `ChallengeStatus::Error` and no challenge.
    pub async fn fetch_current_challenge(&self) -> ChallengeResponse {
        let result = with_fallback(
            "fetch_current_challenge",
            async {
                let raw: V2CurrentChallenge = self
                    .get(self.versioned(&["api", "v2", "challenge"])?)
                    .await?;
                if raw.is_empty() {
                    return Err(ProtocolError::Rejected("empty challenge payload".into()));
                }
                Ok(ChallengeResponse::from(raw))
            },
            move || async move {
                let doc: DocCurrentChallenge = self.get(self.legacy(&["challenge"])?).await?;
                Ok(ChallengeResponse::from(doc))
            },
        )
        .await;

        match result {
            Ok(response) => {
                if let Some(challenge) = &response.challenge {
                    self.remember_challenge(challenge).await;
                }
                response
            }
            Err(e) => {
                error!(error = %e, "could not fetch current challenge");
                ChallengeResponse::error()
            }
        }
    }

    /// Fetch the challenge assigned to a registered worker.
    ///
    /// Falls back to the global schedule, which only counts when active.
    pub async fn fetch_worker_challenge(&self, worker_id: &str) -> Result<Challenge, ProtocolError> {
        let challenge = with_fallback(
            "fetch_worker_challenge",
            async {
                let raw: V2WorkerChallenge = self
                    .get(self.versioned(&["api", "v2", "challenge", worker_id])?)
                    .await?;
                match raw.challenge {
                    Some(challenge) if raw.success => Ok(Challenge::from(challenge)),
                    _ => Err(ProtocolError::Rejected("no challenge for worker".into())),
                }
            },
            move || async move {
                let doc: DocCurrentChallenge = self.get(self.legacy(&["challenge"])?).await?;
                ChallengeResponse::from(doc)
                    .active_challenge()
                    .cloned()
                    .ok_or_else(|| ProtocolError::Rejected("no active challenge".into()))
            },
        )
        .await?;

        self.remember_challenge(&challenge).await;
        Ok(challenge)
    }

    /// Submit a solution for the current global challenge.
    ///
    /// The legacy fallback needs a cached challenge id; without one it is
    /// skipped and `None` is returned.
    pub async fn submit_solution(
        &self,
        nonce: &str,
        address: &str,
        public_key: &str,
        signature: &str,
    ) -> Option<SolutionReceipt> {
        let result = with_fallback(
            "submit_solution",
            async {
                let body = json!({
                    "nonce": nonce,
                    "address": address,
                    "pubkey": public_key,
                    "signature": signature,
                });
                let raw: V2SolutionSubmit = self
                    .post(self.versioned(&["api", "v2", "solution", "submit"])?, body)
                    .await?;
                raw.crypto_receipt
                    .map(SolutionReceipt::from)
                    .ok_or_else(|| ProtocolError::Rejected("response has no crypto receipt".into()))
            },
            move || async move {
                let challenge_id = self
                    .last_challenge_id()
                    .await
                    .ok_or(ProtocolError::MissingChallengeId)?;
                self.submit_legacy(address, &challenge_id, nonce).await
            },
        )
        .await;

        log_submission(nonce, result)
    }

    /// Submit a solution for a worker-scoped challenge.
    pub async fn submit_worker_solution(
        &self,
        worker_id: &str,
        challenge_id: &str,
        nonce: &str,
        address: &str,
    ) -> Option<SolutionReceipt> {
        let result = with_fallback(
            "submit_worker_solution",
            async {
                let body = json!({
                    "workerId": worker_id,
                    "challengeId": challenge_id,
                    "nonce": nonce,
                });
                let raw: V2Solution = self
                    .post(self.versioned(&["api", "v2", "solution"])?, body)
                    .await?;
                if !raw.success {
                    return Err(ProtocolError::Rejected(format!(
                        "solution rejected: {}",
                        raw.message
                    )));
                }
                Ok(raw.receipt.map(SolutionReceipt::from).unwrap_or_default())
            },
            move || async move { self.submit_legacy(address, challenge_id, nonce).await },
        )
        .await;

        log_submission(nonce, result)
    }

    /// Fetch the current work-to-reward rate. Only the versioned API has one.
    pub async fn fetch_rate(&self) -> Result<WorkRate, ProtocolError> {
        let raw: V2Rate = self.get(self.versioned(&["api", "v2", "rate"])?).await?;
        Ok(WorkRate::from(raw))
    }

    async fn submit_legacy(
        &self,
        address: &str,
        challenge_id: &str,
        nonce: &str,
    ) -> Result<SolutionReceipt, ProtocolError> {
        let url = self.legacy(&["solution", address, challenge_id, nonce])?;
        let doc: DocSolution = self.post(url, json!({})).await?;
        doc.crypto_receipt
            .map(SolutionReceipt::from)
            .ok_or_else(|| ProtocolError::Rejected("response has no crypto_receipt".into()))
    }

    async fn remember_challenge(&self, challenge: &Challenge) {
        if challenge.challenge_id.trim().is_empty() {
            return;
        }
        debug!(challenge_id = %challenge.challenge_id, "caching challenge id");
        *self.last_challenge_id.write().await = Some(challenge.challenge_id.clone());
    }

    async fn get<T: DeserializeOwned>(&self, url: String) -> Result<T, ProtocolError> {
        let value = self.transport.get_json(&url).await?;
        decode(value)
    }

    async fn post<T: DeserializeOwned>(&self, url: String, body: Value) -> Result<T, ProtocolError> {
        let value = self.transport.post_json(&url, &body).await?;
        decode(value)
    }

    fn versioned(&self, segments: &[&str]) -> Result<String, ProtocolError> {
        join_segments(&self.config.api_url, segments)
    }

    fn legacy(&self, segments: &[&str]) -> Result<String, ProtocolError> {
        join_segments(&self.config.legacy_url, segments)
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ProtocolError> {
    Ok(serde_json::from_value(lowercase_keys(value))?)
}

fn receipt_from_preimage(preimage: String) -> Result<RegistrationReceipt, ProtocolError> {
    if preimage.trim().is_empty() {
        return Err(ProtocolError::Rejected("registration receipt is empty".into()));
    }
    Ok(RegistrationReceipt { preimage })
}

fn log_submission(
    nonce: &str,
    result: Result<SolutionReceipt, ProtocolError>,
) -> Option<SolutionReceipt> {
    match result {
        Ok(receipt) => {
            info!(nonce, tx_hash = %receipt.tx_hash, "solution accepted");
            Some(receipt)
        }
        Err(e) => {
            warn!(nonce, error = %e, "solution not accepted");
            None
        }
    }
}

/// Append percent-encoded path segments to a base URL.
fn join_segments(base: &str, segments: &[&str]) -> Result<String, ProtocolError> {
    let mut url =
        reqwest::Url::parse(base).map_err(|e| ProtocolError::InvalidUrl(format!("{base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| ProtocolError::InvalidUrl(format!("{base}: cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.into())
}
