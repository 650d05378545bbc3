//! HTTP Promotion Executor
//!
//! Implements PromotionExecutor against a control-plane HTTP API:
//!
//! - `POST {base}/v1/topologies/{id}/promote` with `{"candidate_replica_id": "..."}`
//! - `GET  {base}/v1/topologies/{id}/primaries` answering `{"primaries": ["..."]}`
//!
//! A 4xx answer is a definitive rejection. 5xx answers and connection
//! failures leave the outcome unknown.

use crate::domain::ports::{ExecutorError, PromotionExecutor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for the control plane.
#[derive(Debug, Clone)]
pub struct HttpExecutorConfig {
    /// Base URL, e.g. "http://127.0.0.1:9090"
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for HttpExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9090".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
struct PromoteRequest<'a> {
    candidate_replica_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct PrimariesResponse {
    primaries: Vec<String>,
}

/// Promotion executor over HTTP.
pub struct HttpPromotionExecutor {
    config: HttpExecutorConfig,
    client: reqwest::Client,
}

impl HttpPromotionExecutor {
    pub fn new(config: HttpExecutorConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    fn url(&self, topology_id: &str, action: &str) -> String {
        format!(
            "{}/v1/topologies/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            topology_id,
            action
        )
    }

    fn classify(e: reqwest::Error) -> ExecutorError {
        if e.is_timeout() {
            ExecutorError::Timeout
        } else {
            ExecutorError::Transport(e.to_string())
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ExecutorError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(ExecutorError::Rejected(format!("{} - {}", status, body)))
        } else {
            Err(ExecutorError::Transport(format!("{} - {}", status, body)))
        }
    }
}

#[async_trait]
impl PromotionExecutor for HttpPromotionExecutor {
    async fn promote(
        &self,
        topology_id: &str,
        candidate_replica_id: &str,
    ) -> Result<(), ExecutorError> {
        let url = self.url(topology_id, "promote");
        tracing::debug!(url = %url, candidate = %candidate_replica_id, "sending promotion");

        let response = self
            .client
            .post(&url)
            .json(&PromoteRequest {
                candidate_replica_id,
            })
            .send()
            .await
            .map_err(Self::classify)?;

        Self::check_status(response).await?;
        Ok(())
    }

    async fn observed_primaries(&self, topology_id: &str) -> Result<Vec<String>, ExecutorError> {
        let url = self.url(topology_id, "primaries");

        let response = self.client.get(&url).send().await.map_err(Self::classify)?;
        let response = Self::check_status(response).await?;

        let body: PrimariesResponse = response
            .json()
            .await
            .map_err(|e| ExecutorError::Transport(format!("invalid primaries response: {}", e)))?;
        Ok(body.primaries)
    }
}
