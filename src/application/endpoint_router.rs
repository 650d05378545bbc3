//! Endpoint Router
//!
//! Stable logical endpoints per topology: one read-write endpoint that always
//! names the committed primary, and a read-only set of reachable secondaries
//! that have answered at least one probe.
//! Only the coordinator publishes; everyone else resolves.

use crate::domain::entities::LagState;
use crate::domain::errors::FailoverError;
use crate::domain::services::Topology;
use crate::domain::value_objects::ReplicaRole;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;

/// Published routes of one topology.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteTable {
    pub topology_id: String,
    /// Committed primary
    pub read_write: String,
    /// Reachable, already-probed secondaries, preferred first
    pub read_only: Vec<String>,
    /// Incremented on every publication
    pub generation: u64,
    pub updated_at: DateTime<Utc>,
}

/// Name resolution for logical endpoints.
#[derive(Default)]
pub struct EndpointRouter {
    routes: DashMap<String, RouteTable>,
}

impl EndpointRouter {
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
        }
    }

    /// Compute and publish the routes of a topology.
    ///
    /// Refuses to publish a topology that is not in steady state, so the
    /// read-write endpoint can never name a `Promoting` or `Demoted` replica.
    pub fn publish(
        &self,
        topology: &Topology,
        lag: &HashMap<String, LagState>,
        unreachable_threshold: u32,
    ) -> Result<RouteTable, FailoverError> {
        topology.check_steady()?;

        let read_write = topology
            .primary()
            .map(|r| r.id.clone())
            .ok_or_else(|| FailoverError::InvariantViolation {
                topology_id: topology.id().to_string(),
                detail: "no primary to route to".to_string(),
            })?;

        let mut readable: Vec<_> = topology
            .replicas()
            .iter()
            .filter(|r| r.role == ReplicaRole::Secondary)
            .filter(|r| {
                lag.get(&r.id)
                    .map(|s| s.last_success.is_some() && !s.is_unreachable(unreachable_threshold))
                    .unwrap_or(false)
            })
            .collect();
        readable.sort_by(|a, b| a.preference_key().cmp(&b.preference_key()));
        let read_only = readable.into_iter().map(|r| r.id.clone()).collect();

        let mut entry = self
            .routes
            .entry(topology.id().to_string())
            .or_insert_with(|| RouteTable {
                topology_id: topology.id().to_string(),
                read_write: read_write.clone(),
                read_only: Vec::new(),
                generation: 0,
                updated_at: Utc::now(),
            });

        if entry.read_write != read_write {
            tracing::info!(
                topology_id = %topology.id(),
                from = %entry.read_write,
                to = %read_write,
                "read-write endpoint moved"
            );
        }

        entry.read_write = read_write;
        entry.read_only = read_only;
        entry.generation += 1;
        entry.updated_at = Utc::now();

        Ok(entry.clone())
    }

    /// Replica currently serving writes.
    pub fn resolve_read_write(&self, topology_id: &str) -> Result<String, FailoverError> {
        self.routes
            .get(topology_id)
            .map(|r| r.read_write.clone())
            .ok_or_else(|| FailoverError::UnknownTopology(topology_id.to_string()))
    }

    /// Replicas currently serving reads, preferred first.
    pub fn resolve_read_only(&self, topology_id: &str) -> Result<Vec<String>, FailoverError> {
        self.routes
            .get(topology_id)
            .map(|r| r.read_only.clone())
            .ok_or_else(|| FailoverError::UnknownTopology(topology_id.to_string()))
    }

    /// Full route table, if published.
    pub fn routes(&self, topology_id: &str) -> Option<RouteTable> {
        self.routes.get(topology_id).map(|r| r.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Replica;
    use crate::domain::value_objects::ReplicationMode;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn topology() -> Topology {
        Topology::new(
            "orders",
            vec![
                Replica::new("p", "eastus", ReplicaRole::Primary, 0, ReplicationMode::Sync),
                Replica::new("s2", "westus", ReplicaRole::Secondary, 2, ReplicationMode::Async),
                Replica::new("s1", "northeu", ReplicaRole::Secondary, 1, ReplicationMode::Sync),
                Replica::new("s3", "southasia", ReplicaRole::Secondary, 1, ReplicationMode::Sync),
            ],
        )
        .unwrap()
    }

    fn lag_all_healthy(t: &Topology) -> HashMap<String, LagState> {
        t.replicas()
            .iter()
            .map(|r| {
                let mut state = LagState::new(ts(0));
                state.last_success = Some(ts(0));
                (r.id.clone(), state)
            })
            .collect()
    }

    #[test]
    fn test_resolve_unknown_topology() {
        let router = EndpointRouter::new();
        assert!(matches!(
            router.resolve_read_write("nope"),
            Err(FailoverError::UnknownTopology(_))
        ));
        assert!(router.resolve_read_only("nope").is_err());
        assert!(router.routes("nope").is_none());
    }

    #[test]
    fn test_publish_and_resolve() {
        let router = EndpointRouter::new();
        let t = topology();
        let lag = lag_all_healthy(&t);

        let table = router.publish(&t, &lag, 3).unwrap();
        assert_eq!(table.generation, 1);

        assert_eq!(router.resolve_read_write("orders").unwrap(), "p");
        // Ordered by (priority, id)
        assert_eq!(
            router.resolve_read_only("orders").unwrap(),
            vec!["s1".to_string(), "s3".to_string(), "s2".to_string()]
        );
    }

    #[test]
    fn test_read_only_excludes_unreachable() {
        let router = EndpointRouter::new();
        let t = topology();
        let mut lag = lag_all_healthy(&t);
        lag.get_mut("s1").unwrap().consecutive_failures = 3;
        lag.remove("s3");

        router.publish(&t, &lag, 3).unwrap();
        assert_eq!(router.resolve_read_only("orders").unwrap(), vec!["s2".to_string()]);
    }

    #[test]
    fn test_publish_refuses_in_flight_topology() {
        let router = EndpointRouter::new();
        let mut t = topology();
        let lag = lag_all_healthy(&t);
        router.publish(&t, &lag, 3).unwrap();

        t.begin_promotion("s1").unwrap();
        let err = router.publish(&t, &lag, 3).unwrap_err();
        assert!(matches!(err, FailoverError::InvariantViolation { .. }));

        // Previous routes stay in place
        assert_eq!(router.resolve_read_write("orders").unwrap(), "p");
    }

    #[test]
    fn test_publish_after_commit_moves_read_write() {
        let router = EndpointRouter::new();
        let mut t = topology();
        let lag = lag_all_healthy(&t);
        router.publish(&t, &lag, 3).unwrap();

        let marker = t.begin_promotion("s1").unwrap();
        t.commit_promotion(&marker).unwrap();
        let table = router.publish(&t, &lag, 3).unwrap();

        assert_eq!(table.generation, 2);
        assert_eq!(router.resolve_read_write("orders").unwrap(), "s1");
        assert!(router.resolve_read_only("orders").unwrap().contains(&"p".to_string()));
    }

    #[test]
    fn test_read_only_requires_a_successful_probe() {
        let router = EndpointRouter::new();
        let t = topology();
        let mut lag = lag_all_healthy(&t);
        lag.insert("s1".to_string(), LagState::new(ts(0)));

        router.publish(&t, &lag, 3).unwrap();
        assert_eq!(
            router.resolve_read_only("orders").unwrap(),
            vec!["s3".to_string(), "s2".to_string()]
        );
    }
}
