//! JSON-over-HTTP transport

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::ProtocolError;

/// Moves JSON documents to and from the mining service.
///
/// The protocol client only ever talks through this trait, so tests can
/// script responses per URL.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value, ProtocolError>;

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ProtocolError>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, ProtocolError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, url: &str) -> Result<Value, ProtocolError> {
        debug!(url, "GET");
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json::<Value>().await?)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ProtocolError> {
        debug!(url, "POST");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<Value>().await?)
    }
}
