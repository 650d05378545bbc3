//! Tracing Event Sink
//!
//! Implements EventSink by logging every run as a structured tracing event
//! and keeping a bounded per-topology history for the admin API.

use crate::domain::entities::RunEvent;
use crate::domain::ports::EventSink;
use dashmap::DashMap;
use std::collections::VecDeque;

/// Default number of events kept per topology.
pub const DEFAULT_EVENT_HISTORY: usize = 100;

pub struct TracingEventSink {
    capacity: usize,
    history: DashMap<String, VecDeque<RunEvent>>,
}

impl TracingEventSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            history: DashMap::new(),
        }
    }
}

impl Default for TracingEventSink {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_HISTORY)
    }
}

impl EventSink for TracingEventSink {
    fn emit(&self, event: &RunEvent) {
        let reason = event.decision.as_ref().map(|d| d.reason.as_str()).unwrap_or("none");
        let candidate = event
            .decision
            .as_ref()
            .and_then(|d| d.candidate_replica_id.as_deref())
            .unwrap_or("");
        let data_loss_risk = event
            .decision
            .as_ref()
            .map(|d| d.data_loss_risk)
            .unwrap_or(false);

        match &event.error {
            Some(error) => tracing::warn!(
                event_id = %event.id,
                topology_id = %event.topology_id,
                reason = reason,
                candidate = candidate,
                did_failover = event.did_failover,
                data_loss_risk = data_loss_risk,
                latency_ms = event.latency_ms,
                error = %error,
                "coordinator run"
            ),
            None => tracing::info!(
                event_id = %event.id,
                topology_id = %event.topology_id,
                reason = reason,
                candidate = candidate,
                did_failover = event.did_failover,
                data_loss_risk = data_loss_risk,
                latency_ms = event.latency_ms,
                "coordinator run"
            ),
        }

        if self.capacity == 0 {
            return;
        }
        let mut history = self.history.entry(event.topology_id.clone()).or_default();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(event.clone());
    }

    fn recent(&self, topology_id: &str) -> Vec<RunEvent> {
        self.history
            .get(topology_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::FailoverDecision;
    use crate::domain::value_objects::DecisionReason;
    use chrono::Utc;
    use tracing_test::traced_test;
    use uuid::Uuid;

    fn event(topology_id: &str, latency_ms: u64) -> RunEvent {
        RunEvent {
            id: Uuid::new_v4(),
            topology_id: topology_id.to_string(),
            at: Utc::now(),
            decision: Some(FailoverDecision::hold(DecisionReason::PrimaryHealthy)),
            did_failover: false,
            latency_ms,
            error: None,
        }
    }

    #[test]
    fn test_history_is_bounded_and_ordered() {
        let sink = TracingEventSink::new(3);
        for i in 0..5 {
            sink.emit(&event("orders", i));
        }

        let latencies: Vec<u64> = sink.recent("orders").iter().map(|e| e.latency_ms).collect();
        assert_eq!(latencies, vec![2, 3, 4]);
    }

    #[test]
    fn test_history_is_per_topology() {
        let sink = TracingEventSink::default();
        sink.emit(&event("orders", 1));
        sink.emit(&event("billing", 2));

        assert_eq!(sink.recent("orders").len(), 1);
        assert_eq!(sink.recent("billing").len(), 1);
        assert!(sink.recent("unknown").is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let sink = TracingEventSink::new(0);
        sink.emit(&event("orders", 1));
        assert!(sink.recent("orders").is_empty());
    }

    #[traced_test]
    #[test]
    fn test_emit_logs_structured_fields() {
        let sink = TracingEventSink::default();
        let mut failed = event("orders", 7);
        failed.error = Some("no safe failover candidate".to_string());
        sink.emit(&failed);

        assert!(logs_contain("coordinator run"));
        assert!(logs_contain("topology_id=orders"));
        assert!(logs_contain("primary_healthy"));
        assert!(logs_contain("no safe failover candidate"));
    }
}
