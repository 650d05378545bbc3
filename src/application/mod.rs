//! Application Layer
//!
//! Use cases orchestrating the domain services through the ports.

pub mod coordinator;
pub mod endpoint_router;
pub mod supervisor;

pub use coordinator::{
    Coordinator, CoordinatorPorts, CoordinatorSettings, CoordinatorState, RunReport, TopologyView,
};
pub use endpoint_router::{EndpointRouter, RouteTable};
pub use supervisor::CoordinatorSupervisor;
