//! Failover Errors
//!
//! Error taxonomy shared by the domain services and the coordinator.

/// Errors raised while tracking health, deciding or executing a failover.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FailoverError {
    #[error("unknown replica {replica_id} in topology {topology_id}")]
    UnknownReplica {
        topology_id: String,
        replica_id: String,
    },

    #[error("unknown topology {0}")]
    UnknownTopology(String),

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no safe failover candidate in topology {topology_id}")]
    NoSafeCandidate { topology_id: String },

    #[error("replica {replica_id} in topology {topology_id} is not an eligible secondary")]
    IneligibleCandidate {
        topology_id: String,
        replica_id: String,
    },

    #[error("promotion of {candidate_id} in topology {topology_id} timed out")]
    PromotionTimeout {
        topology_id: String,
        candidate_id: String,
    },

    #[error("promotion of {candidate_id} in topology {topology_id} rejected (data_loss_risk={data_loss_risk}): {reason}")]
    PromotionRejected {
        topology_id: String,
        candidate_id: String,
        reason: String,
        data_loss_risk: bool,
    },

    #[error("reconciliation of topology {topology_id} failed: {reason}")]
    ReconcileFailed { topology_id: String, reason: String },

    #[error("invariant violation in topology {topology_id}: {detail}")]
    InvariantViolation { topology_id: String, detail: String },

    #[error("topology {0} has a failover or reconciliation in progress")]
    FailoverInProgress(String),
}

impl FailoverError {
    /// Whether the next scheduled tick may clear the condition on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoSafeCandidate { .. }
                | Self::PromotionTimeout { .. }
                | Self::PromotionRejected { .. }
                | Self::ReconcileFailed { .. }
                | Self::FailoverInProgress(_)
        )
    }

    /// Short machine-readable kind, used in events and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownReplica { .. } => "unknown_replica",
            Self::UnknownTopology(_) => "unknown_topology",
            Self::InvalidTopology(_) => "invalid_topology",
            Self::InvalidConfig(_) => "invalid_config",
            Self::NoSafeCandidate { .. } => "no_safe_candidate",
            Self::IneligibleCandidate { .. } => "ineligible_candidate",
            Self::PromotionTimeout { .. } => "promotion_timeout",
            Self::PromotionRejected { .. } => "promotion_rejected",
            Self::ReconcileFailed { .. } => "reconcile_failed",
            Self::InvariantViolation { .. } => "invariant_violation",
            Self::FailoverInProgress(_) => "failover_in_progress",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transient = FailoverError::PromotionTimeout {
            topology_id: "t".to_string(),
            candidate_id: "s1".to_string(),
        };
        assert!(transient.is_transient());

        let fatal = FailoverError::InvariantViolation {
            topology_id: "t".to_string(),
            detail: "two primaries".to_string(),
        };
        assert!(!fatal.is_transient());

        assert!(!FailoverError::UnknownReplica {
            topology_id: "t".to_string(),
            replica_id: "x".to_string(),
        }
        .is_transient());
    }

    #[test]
    fn test_rejected_message_flags_data_loss() {
        let err = FailoverError::PromotionRejected {
            topology_id: "orders".to_string(),
            candidate_id: "s1".to_string(),
            reason: "409 conflict".to_string(),
            data_loss_risk: true,
        };
        let msg = err.to_string();
        assert!(msg.contains("orders"));
        assert!(msg.contains("s1"));
        assert!(msg.contains("data_loss_risk=true"));
        assert_eq!(err.kind(), "promotion_rejected");
    }
}
