//! Promotion Executor Port
//!
//! Defines the interface to the backend that actually moves the primary role,
//! e.g. a managed database's "set primary" operation.

use async_trait::async_trait;

/// Failure of an external promotion or role query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// The backend definitively refused; nothing changed.
    #[error("rejected: {0}")]
    Rejected(String),
    /// No answer in time; the operation may or may not have happened.
    #[error("timed out")]
    Timeout,
    /// The call failed in transit; the operation may or may not have happened.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ExecutorError {
    /// Whether the outcome of the call is unknown and must be reconciled.
    pub fn is_ambiguous(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// Executor of primary role changes.
///
/// This is an outbound port. The backend is the source of truth for which
/// replica is primary; the coordinator's in-memory roles are a cache of it.
#[async_trait]
pub trait PromotionExecutor: Send + Sync {
    /// Promote `candidate_replica_id` to primary of `topology_id`.
    async fn promote(&self, topology_id: &str, candidate_replica_id: &str)
        -> Result<(), ExecutorError>;

    /// Replicas the backend currently considers primary.
    ///
    /// Exactly one entry is the healthy answer; anything else is a split-brain
    /// or lost-primary condition.
    async fn observed_primaries(&self, topology_id: &str) -> Result<Vec<String>, ExecutorError>;
}
