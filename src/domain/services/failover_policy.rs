//! Failover Policy Engine
//!
//! Pure domain logic deciding whether a topology should fail over and to
//! which secondary. This service has NO side effects: identical inputs always
//! produce an identical decision.

use crate::domain::entities::{FailoverDecision, FailoverGroupConfig, LagState, Replica};
use crate::domain::services::replica_registry::Topology;
use crate::domain::value_objects::{DecisionReason, FailoverPolicy};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Failover decision service.
///
/// The evaluation order is:
/// 1. Manual requests, honored under any policy
/// 2. Manual policy without a request never fails over
/// 3. Primary below the unreachable threshold is healthy
/// 4. Grace period, timed from the primary's last successful check
/// 5. Best reachable secondary by `(priority, id)`
pub struct FailoverPolicyEngine;

impl FailoverPolicyEngine {
    /// Evaluate a topology.
    ///
    /// # Arguments
    /// * `topology` - Current roles
    /// * `lag` - Snapshot from the lag tracker
    /// * `now` - Evaluation instant
    /// * `manual_request` - Replica an operator asked to promote, if any
    /// * `config` - Failover group settings
    pub fn evaluate(
        topology: &Topology,
        lag: &HashMap<String, LagState>,
        now: DateTime<Utc>,
        manual_request: Option<&str>,
        config: &FailoverGroupConfig,
    ) -> FailoverDecision {
        if let Some(candidate_id) = manual_request {
            return match topology.secondaries().find(|r| r.id == candidate_id) {
                Some(candidate) => {
                    FailoverDecision::promote(candidate, DecisionReason::ManualRequest)
                }
                None => FailoverDecision::hold(DecisionReason::ManualRequest),
            };
        }

        if config.failover_policy == FailoverPolicy::Manual {
            return FailoverDecision::hold(DecisionReason::AutomaticFailoverDisabled);
        }

        let Some(primary) = topology.primary() else {
            return FailoverDecision::hold(DecisionReason::NoPrimary);
        };

        let Some(primary_lag) = lag.get(&primary.id) else {
            return FailoverDecision::hold(DecisionReason::PrimaryHealthy);
        };

        if !primary_lag.is_unreachable(config.unreachable_threshold) {
            return FailoverDecision::hold(DecisionReason::PrimaryHealthy);
        }

        if now - primary_lag.grace_anchor() < config.grace_period() {
            return FailoverDecision::hold(DecisionReason::GracePeriodPending);
        }

        let Some(candidate) = Self::select_candidate(topology, lag, config.unreachable_threshold)
        else {
            return FailoverDecision::hold(DecisionReason::NoSafeCandidate);
        };

        FailoverDecision::promote(candidate, DecisionReason::PrimaryUnreachable)
    }

    /// Pick the preferred reachable secondary.
    ///
    /// Secondaries without tracked state are never chosen.
    pub fn select_candidate<'a>(
        topology: &'a Topology,
        lag: &HashMap<String, LagState>,
        unreachable_threshold: u32,
    ) -> Option<&'a Replica> {
        topology
            .secondaries()
            .filter(|r| {
                lag.get(&r.id)
                    .map(|s| !s.is_unreachable(unreachable_threshold))
                    .unwrap_or(false)
            })
            .min_by(|a, b| a.preference_key().cmp(&b.preference_key()))
    }
}
