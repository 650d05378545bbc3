//! Failover Coordinator Library
//!
//! This module exposes the coordinator components for use in integration
//! tests and as a library.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{
    Coordinator, CoordinatorPorts, CoordinatorSettings, CoordinatorState, CoordinatorSupervisor,
    EndpointRouter, RouteTable, RunReport, TopologyView,
};
pub use config::{load_config, load_topologies, parse_topologies};
pub use domain::entities::{
    FailoverDecision, FailoverGroupConfig, HealthSample, LagState, Replica, RunEvent,
};
pub use domain::errors::FailoverError;
pub use domain::ports::{EventSink, ExecutorError, HealthProbe, PromotionExecutor};
pub use domain::services::{FailoverPolicyEngine, LagTracker, PromotionMarker, Topology};
pub use domain::value_objects::{DecisionReason, FailoverPolicy, ReplicaRole, ReplicationMode};
