//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the failover domain.
//! They have no I/O dependencies and contain only business logic.

use crate::domain::errors::FailoverError;
use crate::domain::value_objects::{DecisionReason, FailoverPolicy, ReplicaRole, ReplicationMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound for the grace period: 1440 minutes.
pub const MAX_GRACE_PERIOD_SECONDS: u32 = 1440 * 60;

/// One participant in a replicated topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replica {
    /// Identifier, unique within its topology
    pub id: String,
    /// Logical region tag, unique within its topology
    pub region: String,
    /// Current role
    pub role: ReplicaRole,
    /// Failover ordering, lower is preferred
    pub priority: i32,
    /// Replication mode from the primary
    pub replication_mode: ReplicationMode,
    /// Address the health probe connects to (host:port)
    #[serde(default)]
    pub endpoint: String,
}

impl Replica {
    pub fn new(
        id: impl Into<String>,
        region: impl Into<String>,
        role: ReplicaRole,
        priority: i32,
        replication_mode: ReplicationMode,
    ) -> Self {
        Self {
            id: id.into(),
            region: region.into(),
            role,
            priority,
            replication_mode,
            endpoint: String::new(),
        }
    }

    /// Set the probe endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Ordering key for promotion and read routing: `(priority, id)`.
    pub fn preference_key(&self) -> (i32, &str) {
        (self.priority, self.id.as_str())
    }
}

/// A single health observation of one replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub replica_id: String,
    pub timestamp: DateTime<Utc>,
    pub reachable: bool,
    pub observed_lag_millis: i64,
}

impl HealthSample {
    /// A successful observation.
    pub fn reachable(
        replica_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        observed_lag_millis: i64,
    ) -> Self {
        Self {
            replica_id: replica_id.into(),
            timestamp,
            reachable: true,
            observed_lag_millis,
        }
    }

    /// A failed observation.
    pub fn unreachable(replica_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            replica_id: replica_id.into(),
            timestamp,
            reachable: false,
            observed_lag_millis: 0,
        }
    }
}

/// Accumulated health of one replica, owned by the lag tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LagState {
    /// Failed checks since the last successful one
    pub consecutive_failures: u32,
    /// Timestamp of the last successful check, if any
    pub last_success: Option<DateTime<Utc>>,
    /// Exponential moving average of the observed replication lag
    pub ema_lag_millis: f64,
    /// When tracking of this replica started
    pub tracking_since: DateTime<Utc>,
    /// Timestamp of the last applied sample (success or failure)
    pub last_sample_at: Option<DateTime<Utc>>,
}

impl LagState {
    pub fn new(tracking_since: DateTime<Utc>) -> Self {
        Self {
            consecutive_failures: 0,
            last_success: None,
            ema_lag_millis: 0.0,
            tracking_since,
            last_sample_at: None,
        }
    }

    /// Instant the grace timer counts from.
    ///
    /// A replica that never answered is timed from the moment tracking began.
    pub fn grace_anchor(&self) -> DateTime<Utc> {
        self.last_success.unwrap_or(self.tracking_since)
    }

    /// Whether the replica crossed the unreachable threshold.
    pub fn is_unreachable(&self, threshold: u32) -> bool {
        self.consecutive_failures >= threshold
    }
}

/// Outcome of one policy evaluation. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailoverDecision {
    pub should_failover: bool,
    pub candidate_replica_id: Option<String>,
    pub reason: DecisionReason,
    pub data_loss_risk: bool,
}

impl FailoverDecision {
    /// No failover.
    pub fn hold(reason: DecisionReason) -> Self {
        Self {
            should_failover: false,
            candidate_replica_id: None,
            reason,
            data_loss_risk: false,
        }
    }

    /// Fail over to `candidate`.
    pub fn promote(candidate: &Replica, reason: DecisionReason) -> Self {
        Self {
            should_failover: true,
            candidate_replica_id: Some(candidate.id.clone()),
            reason,
            data_loss_risk: candidate.replication_mode.risks_data_loss(),
        }
    }
}

/// Failover group settings, immutable at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverGroupConfig {
    #[serde(default)]
    pub failover_policy: FailoverPolicy,
    #[serde(default = "default_grace_period_seconds")]
    pub grace_period_seconds: u32,
    #[serde(default = "default_unreachable_threshold")]
    pub unreachable_threshold: u32,
}

fn default_grace_period_seconds() -> u32 {
    3600
}

fn default_unreachable_threshold() -> u32 {
    3
}

impl Default for FailoverGroupConfig {
    fn default() -> Self {
        Self {
            failover_policy: FailoverPolicy::Automatic,
            grace_period_seconds: default_grace_period_seconds(),
            unreachable_threshold: default_unreachable_threshold(),
        }
    }
}

impl FailoverGroupConfig {
    pub fn new(
        failover_policy: FailoverPolicy,
        grace_period_seconds: u32,
        unreachable_threshold: u32,
    ) -> Self {
        Self {
            failover_policy,
            grace_period_seconds,
            unreachable_threshold,
        }
    }

    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.grace_period_seconds))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), FailoverError> {
        if self.grace_period_seconds > MAX_GRACE_PERIOD_SECONDS {
            return Err(FailoverError::InvalidConfig(format!(
                "grace_period_seconds must be at most {} (1440 minutes), got {}",
                MAX_GRACE_PERIOD_SECONDS, self.grace_period_seconds
            )));
        }
        if self.unreachable_threshold == 0 {
            return Err(FailoverError::InvalidConfig(
                "unreachable_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Structured record emitted after every coordinator run.
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    pub id: Uuid,
    pub topology_id: String,
    pub at: DateTime<Utc>,
    pub decision: Option<FailoverDecision>,
    pub did_failover: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}
