//! Coordinator Supervisor
//!
//! Owns one coordinator per topology and runs each on its own worker task.
//! Workers tick on a fixed interval, run early when an operator queues a
//! manual failover, and stop between runs on shutdown.

use crate::application::coordinator::Coordinator;
use crate::domain::errors::FailoverError;
use crate::infrastructure::ShutdownController;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Registry and scheduler of coordinators.
pub struct CoordinatorSupervisor {
    coordinators: DashMap<String, Arc<Coordinator>>,
    shutdown: ShutdownController,
    tick_interval: Duration,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl CoordinatorSupervisor {
    pub fn new(tick_interval: Duration, shutdown: ShutdownController) -> Self {
        Self {
            coordinators: DashMap::new(),
            shutdown,
            tick_interval,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a coordinator. Topology ids must be unique.
    pub fn register(&self, coordinator: Arc<Coordinator>) -> Result<(), FailoverError> {
        let id = coordinator.topology_id().to_string();
        if self.coordinators.contains_key(&id) {
            return Err(FailoverError::InvalidTopology(format!(
                "topology {} registered twice",
                id
            )));
        }
        self.coordinators.insert(id, coordinator);
        Ok(())
    }

    /// Coordinator of a registered topology.
    pub fn get(&self, topology_id: &str) -> Result<Arc<Coordinator>, FailoverError> {
        self.coordinators
            .get(topology_id)
            .map(|c| c.clone())
            .ok_or_else(|| FailoverError::UnknownTopology(topology_id.to_string()))
    }

    /// Registered topology ids, sorted.
    pub fn topology_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.coordinators.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of registered topologies.
    pub fn len(&self) -> usize {
        self.coordinators.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.coordinators.is_empty()
    }

    /// Spawn one worker per registered coordinator.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        for entry in self.coordinators.iter() {
            let coordinator = entry.value().clone();
            let shutdown = self.shutdown.clone();
            let interval = self.tick_interval;
            handles.push(tokio::spawn(run_worker(coordinator, shutdown, interval)));
        }
        tracing::info!(
            topologies = handles.len(),
            tick_interval_secs = self.tick_interval.as_secs_f64(),
            "coordinator workers started"
        );
    }

    /// Wait for every worker to exit. Workers exit only after shutdown.
    pub async fn join(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("coordinator worker panicked: {}", e);
            }
        }
    }
}

async fn run_worker(coordinator: Arc<Coordinator>, shutdown: ShutdownController, period: Duration) {
    let mut shutdown_rx = shutdown.subscribe();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(topology_id = %coordinator.topology_id(), "worker started");

    loop {
        if shutdown.is_shutdown() {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = coordinator.woken() => {}
            _ = shutdown_rx.recv() => break,
        }

        let _guard = shutdown.run_guard();
        match coordinator.run_once(Utc::now()).await {
            Ok(report) if report.did_failover => {
                tracing::info!(topology_id = %coordinator.topology_id(), "run completed with failover");
            }
            Ok(_) => {}
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    topology_id = %coordinator.topology_id(),
                    kind = e.kind(),
                    "run failed, retrying on next tick: {}",
                    e
                );
            }
            Err(e) => {
                tracing::error!(
                    topology_id = %coordinator.topology_id(),
                    kind = e.kind(),
                    "run failed: {}",
                    e
                );
            }
        }
    }

    tracing::debug!(topology_id = %coordinator.topology_id(), "worker stopped");
}
