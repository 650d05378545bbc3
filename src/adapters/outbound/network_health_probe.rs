//! Network Health Probe
//!
//! Implements HealthProbe with a TCP connect or an HTTP GET against the
//! replica's endpoint. HTTP probes may report replication lag in the body.

use crate::domain::entities::{HealthSample, Replica};
use crate::domain::ports::HealthProbe;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// How a replica is probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeKind {
    /// Reachable if a TCP connection opens
    Tcp,
    /// Reachable on a 2xx answer to `GET http://{endpoint}{path}`
    Http { path: String },
}

/// Optional body of an HTTP health answer.
#[derive(Debug, Default, Deserialize)]
struct LagReport {
    #[serde(default)]
    replication_lag_ms: i64,
}

/// Probe over the network.
pub struct NetworkHealthProbe {
    kind: ProbeKind,
    client: reqwest::Client,
}

impl NetworkHealthProbe {
    pub fn new(kind: ProbeKind) -> Self {
        Self {
            kind,
            client: reqwest::Client::new(),
        }
    }

    /// TCP connect check. Lag is unknown and reported as zero.
    async fn tcp_check(addr: &str, timeout: Duration) -> Result<i64, String> {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(mut stream)) => {
                let _ = stream.shutdown().await;
                Ok(0)
            }
            Ok(Err(e)) => Err(format!("connection failed: {}", e)),
            Err(_) => Err("connection timeout".to_string()),
        }
    }

    /// HTTP check. A body that is not a lag report still counts as healthy.
    async fn http_check(&self, addr: &str, path: &str, timeout: Duration) -> Result<i64, String> {
        let url = format!("http://{}{}", addr, path);

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("unhealthy status: {}", response.status()));
        }

        let body = response.bytes().await.unwrap_or_default();
        let report: LagReport = serde_json::from_slice(&body).unwrap_or_default();
        Ok(report.replication_lag_ms)
    }
}

#[async_trait]
impl HealthProbe for NetworkHealthProbe {
    async fn check(&self, replica: &Replica, timeout: Duration) -> HealthSample {
        if replica.endpoint.is_empty() {
            tracing::debug!(replica_id = %replica.id, "replica has no endpoint, reporting unreachable");
            return HealthSample::unreachable(replica.id.clone(), Utc::now());
        }

        let result = match &self.kind {
            ProbeKind::Tcp => Self::tcp_check(&replica.endpoint, timeout).await,
            ProbeKind::Http { path } => self.http_check(&replica.endpoint, path, timeout).await,
        };

        match result {
            Ok(lag) => HealthSample::reachable(replica.id.clone(), Utc::now(), lag),
            Err(e) => {
                tracing::debug!(
                    replica_id = %replica.id,
                    endpoint = %replica.endpoint,
                    error = %e,
                    "health probe failed"
                );
                HealthSample::unreachable(replica.id.clone(), Utc::now())
            }
        }
    }
}
