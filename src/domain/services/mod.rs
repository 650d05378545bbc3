mod failover_policy;
mod lag_tracker;
pub mod replica_registry;

pub use failover_policy::FailoverPolicyEngine;
pub use lag_tracker::{LagTracker, RecordOutcome, DEFAULT_LAG_ALPHA};
pub use replica_registry::{PromotionMarker, Topology};
