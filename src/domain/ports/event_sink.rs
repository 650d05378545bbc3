//! Event Sink Port
//!
//! Defines where per-run coordinator events go.

use crate::domain::entities::RunEvent;

/// Sink for coordinator run events.
///
/// This is an outbound port for logging and alerting pipelines.
pub trait EventSink: Send + Sync {
    /// Record one run event.
    fn emit(&self, event: &RunEvent);

    /// Most recent events for a topology, newest last.
    fn recent(&self, topology_id: &str) -> Vec<RunEvent>;
}
