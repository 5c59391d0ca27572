//! Test doubles shared by the unit tests

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::identity::{Identity, IdentityId};
use crate::rpc::{ApiConfig, ProtocolClient, ProtocolError, Transport};
use crate::store::{IdentityStore, MemoryStore, StoreError};
use crate::wallet::{WalletCredentials, WalletError, WalletProvisioner};

pub const API: &str = "http://api.test";
pub const LEGACY: &str = "http://legacy.test";

pub fn test_config() -> ApiConfig {
    ApiConfig {
        api_url: API.to_string(),
        legacy_url: LEGACY.to_string(),
        ..Default::default()
    }
}

pub fn test_client(transport: ScriptedTransport) -> ProtocolClient {
    ProtocolClient::with_transport(test_config(), Arc::new(transport))
}

#[derive(Clone)]
enum Reply {
    Json(Value),
    Fail(String),
}

#[derive(Default)]
struct Script {
    routes: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<(String, Option<Value>)>>,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Transport answering from a per-URL script. Unscripted URLs fail.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get(&self, url: &str, body: Value) {
        self.route("GET", url, Reply::Json(body));
    }

    pub fn on_post(&self, url: &str, body: Value) {
        self.route("POST", url, Reply::Json(body));
    }

    pub fn fail_get(&self, url: &str, reason: &str) {
        self.route("GET", url, Reply::Fail(reason.to_string()));
    }

    pub fn fail_post(&self, url: &str, reason: &str) {
        self.route("POST", url, Reply::Fail(reason.to_string()));
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.script.latency.lock().unwrap() = Some(latency);
    }

    pub fn total_calls(&self) -> usize {
        self.script.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, method: &str, url: &str) -> usize {
        let key = format!("{method} {url}");
        self.script
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == key)
            .count()
    }

    pub fn posted_bodies(&self, url: &str) -> Vec<Value> {
        let key = format!("POST {url}");
        self.script
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == key)
            .filter_map(|(_, body)| body.clone())
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.script.max_in_flight.load(Ordering::SeqCst)
    }

    fn route(&self, method: &str, url: &str, reply: Reply) {
        self.script
            .routes
            .lock()
            .unwrap()
            .insert(format!("{method} {url}"), reply);
    }

    async fn answer(&self, method: &str, url: &str, body: Option<Value>) -> Result<Value, ProtocolError> {
        let key = format!("{method} {url}");
        self.script.calls.lock().unwrap().push((key.clone(), body));

        let now = self.script.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = *self.script.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.script.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self.script.routes.lock().unwrap().get(&key).cloned();
        match reply {
            Some(Reply::Json(value)) => Ok(value),
            Some(Reply::Fail(reason)) => Err(ProtocolError::Transport(reason)),
            None => Err(ProtocolError::Transport(format!("no route for {key}"))),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get_json(&self, url: &str) -> Result<Value, ProtocolError> {
        self.answer("GET", url, None).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ProtocolError> {
        self.answer("POST", url, Some(body.clone())).await
    }
}

/// Provisioner handing out deterministic credentials and counting concurrency
#[derive(Default)]
pub struct FakeWallet {
    pub fail_provision: bool,
    pub fail_open: bool,
    pub latency: Option<Duration>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub provisioned: AtomicUsize,
}

impl FakeWallet {
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn track(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WalletProvisioner for FakeWallet {
    async fn provision(&self, identity: &Identity) -> Result<String, WalletError> {
        self.track().await;
        if self.fail_provision {
            return Err(WalletError::Provisioning("extension unavailable".into()));
        }
        self.provisioned.fetch_add(1, Ordering::SeqCst);
        Ok(format!("addr{}", identity.id))
    }

    async fn sign(&self, identity: &Identity, _message: &str) -> Result<WalletCredentials, WalletError> {
        Ok(WalletCredentials {
            address: identity.wallet_address.clone(),
            signature: format!("sig{}", identity.id),
            public_key: format!("pk{}", identity.id),
        })
    }

    async fn open(&self, _identity: &Identity) -> Result<(), WalletError> {
        self.track().await;
        if self.fail_open {
            return Err(WalletError::Provisioning("session did not open".into()));
        }
        Ok(())
    }

    async fn close(&self, _identity: &Identity) -> Result<(), WalletError> {
        Ok(())
    }
}

/// Store whose writes fail once `broken` is set
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub broken: std::sync::atomic::AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for FlakyStore {
    async fn create(&self, name: &str) -> Result<Identity, StoreError> {
        self.check()?;
        self.inner.create(name).await
    }

    async fn get(&self, id: IdentityId) -> Result<Identity, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<Identity>, StoreError> {
        self.inner.list().await
    }

    async fn update(&self, identity: &Identity) -> Result<(), StoreError> {
        self.check()?;
        self.inner.update(identity).await
    }
}
