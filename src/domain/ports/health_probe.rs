//! Health Probe Port
//!
//! Defines the interface for observing one replica's reachability and lag.
//! Implementations may open a TCP connection, call an HTTP health endpoint,
//! or query a managed service's replication metrics.

use crate::domain::entities::{HealthSample, Replica};
use async_trait::async_trait;
use std::time::Duration;

/// Probe for replica health.
///
/// This is an outbound port. A probe never fails: an unreachable replica
/// is reported as a sample with `reachable == false`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Check a replica, giving up after `timeout`.
    async fn check(&self, replica: &Replica, timeout: Duration) -> HealthSample;
}
