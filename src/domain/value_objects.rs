//! Value Objects - Immutable domain primitives
//!
//! Small, copyable enums that describe replicas, policies and decisions.
//! They carry no identity and are compared by value.

use serde::{Deserialize, Serialize};

/// Role a replica currently holds inside its topology.
///
/// `Promoting` and `Demoted` are transient markers that only exist while a
/// promotion transaction is in flight (or after a crash in the middle of one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaRole {
    /// Read-write replica
    Primary,
    /// Readable standby
    Secondary,
    /// Candidate being promoted by an in-flight failover
    Promoting,
    /// Former primary while a failover is in flight
    Demoted,
    /// Secondary that failed enough consecutive health checks
    Unreachable,
}

impl ReplicaRole {
    /// Whether this role only exists during a promotion transaction.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Promoting | Self::Demoted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Promoting => "promoting",
            Self::Demoted => "demoted",
            Self::Unreachable => "unreachable",
        }
    }
}

impl std::fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a secondary receives changes from the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// Commits are acknowledged by the replica; promotion loses nothing.
    Sync,
    /// Replica may trail the primary; promotion can lose recent writes.
    Async,
}

impl ReplicationMode {
    /// Whether promoting a replica in this mode can lose committed writes.
    pub fn risks_data_loss(&self) -> bool {
        matches!(self, Self::Async)
    }
}

impl std::fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
        }
    }
}

/// Failover policy of a failover group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailoverPolicy {
    /// The coordinator fails over on its own once the primary is unreachable
    /// for longer than the grace period.
    #[default]
    Automatic,
    /// Only operator requests trigger a failover.
    Manual,
}

impl std::fmt::Display for FailoverPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Automatic => write!(f, "automatic"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Why the policy engine reached its decision.
///
/// `PrimaryUnreachable` and `ManualRequest` accompany a failover (or, for
/// `ManualRequest`, a rejected operator request). `GracePeriodExpired` is
/// accepted on the wire but never produced by the engine. The rest explain
/// why no failover happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Primary stopped answering and the grace period ran out.
    PrimaryUnreachable,
    /// Grace period ran out.
    GracePeriodExpired,
    /// Operator asked for a failover.
    ManualRequest,
    /// Primary failures are below the unreachable threshold.
    PrimaryHealthy,
    /// Primary is unreachable but still inside the grace period.
    GracePeriodPending,
    /// Policy is manual and nobody asked.
    AutomaticFailoverDisabled,
    /// Every secondary is unreachable or absent.
    NoSafeCandidate,
    /// The topology has no primary to fail over from.
    NoPrimary,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryUnreachable => "primary_unreachable",
            Self::GracePeriodExpired => "grace_period_expired",
            Self::ManualRequest => "manual_request",
            Self::PrimaryHealthy => "primary_healthy",
            Self::GracePeriodPending => "grace_period_pending",
            Self::AutomaticFailoverDisabled => "automatic_failover_disabled",
            Self::NoSafeCandidate => "no_safe_candidate",
            Self::NoPrimary => "no_primary",
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
