//! Lag Tracker
//!
//! Folds health samples into per-replica state: consecutive failures, last
//! successful check and a smoothed replication lag.

use crate::domain::entities::{HealthSample, LagState};
use crate::domain::errors::FailoverError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Default EMA smoothing factor.
pub const DEFAULT_LAG_ALPHA: f64 = 0.3;

/// What happened to a recorded sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Sample was folded into the replica's state
    Applied,
    /// Sample was older than one already applied and was dropped
    Stale,
}

/// Per-topology accumulator of replica health.
///
/// Owned by a single coordinator; readers get copies via [`LagTracker::snapshot`].
#[derive(Debug, Clone)]
pub struct LagTracker {
    topology_id: String,
    alpha: f64,
    states: HashMap<String, LagState>,
}

impl LagTracker {
    /// Start tracking `replica_ids` at `now`.
    pub fn new<I, S>(
        topology_id: impl Into<String>,
        replica_ids: I,
        alpha: f64,
        now: DateTime<Utc>,
    ) -> Result<Self, FailoverError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(FailoverError::InvalidConfig(format!(
                "lag smoothing factor must be in (0, 1], got {}",
                alpha
            )));
        }

        let states = replica_ids
            .into_iter()
            .map(|id| (id.into(), LagState::new(now)))
            .collect();

        Ok(Self {
            topology_id: topology_id.into(),
            alpha,
            states,
        })
    }

    /// Begin tracking a replica. No-op if it is already tracked.
    pub fn track(&mut self, replica_id: impl Into<String>, now: DateTime<Utc>) {
        self.states
            .entry(replica_id.into())
            .or_insert_with(|| LagState::new(now));
    }

    /// Stop tracking a replica. Later samples for it are rejected.
    pub fn untrack(&mut self, replica_id: &str) -> bool {
        self.states.remove(replica_id).is_some()
    }

    /// Fold one sample into the state of its replica.
    ///
    /// Samples older than the last applied one for the same replica are
    /// dropped so a slow probe cannot reset the failure count with stale data.
    pub fn record(&mut self, sample: &HealthSample) -> Result<RecordOutcome, FailoverError> {
        let alpha = self.alpha;
        let state = self.states.get_mut(&sample.replica_id).ok_or_else(|| {
            FailoverError::UnknownReplica {
                topology_id: self.topology_id.clone(),
                replica_id: sample.replica_id.clone(),
            }
        })?;

        if let Some(last) = state.last_sample_at {
            if sample.timestamp < last {
                tracing::debug!(
                    topology_id = %self.topology_id,
                    replica_id = %sample.replica_id,
                    "dropping out-of-order health sample"
                );
                return Ok(RecordOutcome::Stale);
            }
        }
        state.last_sample_at = Some(sample.timestamp);

        if sample.reachable {
            let observed = sample.observed_lag_millis.max(0) as f64;
            state.ema_lag_millis = if state.last_success.is_none() {
                observed
            } else {
                alpha * observed + (1.0 - alpha) * state.ema_lag_millis
            };
            state.consecutive_failures = 0;
            state.last_success = Some(sample.timestamp);
        } else {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        }

        Ok(RecordOutcome::Applied)
    }

    /// State of one tracked replica.
    pub fn get(&self, replica_id: &str) -> Option<&LagState> {
        self.states.get(replica_id)
    }

    /// Immutable copy of every replica's state.
    pub fn snapshot(&self) -> HashMap<String, LagState> {
        self.states.clone()
    }
}
