//! Coordinator - Failover orchestration use case
//!
//! Drives one topology: collects health samples, feeds the lag tracker, asks
//! the policy engine for a decision and executes promotions as a single
//! transaction. The coordinator is the only writer of its topology.

use crate::application::endpoint_router::EndpointRouter;
use crate::domain::entities::{
    FailoverDecision, FailoverGroupConfig, HealthSample, LagState, Replica, RunEvent,
};
use crate::domain::errors::FailoverError;
use crate::domain::ports::{EventSink, ExecutorError, HealthProbe, PromotionExecutor};
use crate::domain::services::{
    FailoverPolicyEngine, LagTracker, PromotionMarker, Topology, DEFAULT_LAG_ALPHA,
};
use crate::domain::value_objects::{DecisionReason, ReplicaRole};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use uuid::Uuid;

/// Timeouts and tuning for one coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Budget for one health probe
    pub probe_timeout: Duration,
    /// Budget for one promotion or role query
    pub promotion_timeout: Duration,
    /// EMA smoothing factor for replication lag
    pub lag_alpha: f64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            promotion_timeout: Duration::from_secs(30),
            lag_alpha: DEFAULT_LAG_ALPHA,
        }
    }
}

/// Outbound collaborators of a coordinator.
#[derive(Clone)]
pub struct CoordinatorPorts {
    pub probe: Arc<dyn HealthProbe>,
    pub executor: Arc<dyn PromotionExecutor>,
    pub events: Arc<dyn EventSink>,
}

/// Lifecycle state of a coordinated topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CoordinatorState {
    /// Exactly one primary, no transaction in flight
    Stable,
    /// Promotion transaction in flight
    FailoverInProgress,
    /// Cached roles must be checked against the backend before any action
    ReconcilePending,
    /// Split-brain or lost primary; automatic actions refused
    Halted { detail: String },
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub did_failover: bool,
    pub decision: Option<FailoverDecision>,
}

/// Read-only view of a coordinator, refreshed after every mutation.
#[derive(Debug, Clone, Serialize)]
pub struct TopologyView {
    pub topology_id: String,
    pub state: CoordinatorState,
    pub config: FailoverGroupConfig,
    pub replicas: Vec<Replica>,
    pub lag: BTreeMap<String, LagState>,
    pub updated_at: DateTime<Utc>,
}

impl TopologyView {
    /// Committed primary, if any.
    pub fn primary(&self) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.role == ReplicaRole::Primary)
    }
}

struct Inner {
    topology: Topology,
    tracker: LagTracker,
    state: CoordinatorState,
}

/// Failover coordinator for one topology.
///
/// `run_once` serializes on an async mutex, so at most one run (and thus
/// at most one promotion) is in flight per topology.
pub struct Coordinator {
    topology_id: String,
    config: FailoverGroupConfig,
    settings: CoordinatorSettings,
    ports: CoordinatorPorts,
    router: Arc<EndpointRouter>,
    inner: tokio::sync::Mutex<Inner>,
    view: RwLock<TopologyView>,
    pending_manual: Mutex<Option<String>>,
    wake: Notify,
}

impl Coordinator {
    /// Create a coordinator for a topology loaded from static configuration.
    ///
    /// The cached roles are not trusted: the coordinator starts in
    /// `ReconcilePending` and its first run adopts the backend's view.
    pub fn new(
        topology: Topology,
        config: FailoverGroupConfig,
        settings: CoordinatorSettings,
        ports: CoordinatorPorts,
        router: Arc<EndpointRouter>,
        now: DateTime<Utc>,
    ) -> Result<Self, FailoverError> {
        config.validate()?;

        let tracker = LagTracker::new(
            topology.id(),
            topology.replicas().iter().map(|r| r.id.clone()),
            settings.lag_alpha,
            now,
        )?;

        let inner = Inner {
            topology,
            tracker,
            state: CoordinatorState::ReconcilePending,
        };
        let view = Self::build_view(&inner, &config);

        Ok(Self {
            topology_id: inner.topology.id().to_string(),
            config,
            settings,
            ports,
            router,
            inner: tokio::sync::Mutex::new(inner),
            view: RwLock::new(view),
            pending_manual: Mutex::new(None),
            wake: Notify::new(),
        })
    }

    /// Id of the coordinated topology.
    pub fn topology_id(&self) -> &str {
        &self.topology_id
    }

    /// Failover group settings, fixed at construction.
    pub fn config(&self) -> &FailoverGroupConfig {
        &self.config
    }

    /// Latest published view. Never blocks on an in-flight run.
    pub fn view(&self) -> TopologyView {
        self.view.read().clone()
    }

    /// Completes when a manual request asks for an immediate run.
    pub async fn woken(&self) {
        self.wake.notified().await
    }

    /// Queue an operator failover to `candidate_id` and wake the worker.
    ///
    /// The request is validated against the latest view; the policy engine
    /// checks it again on the run that consumes it.
    pub fn request_failover(&self, candidate_id: &str) -> Result<(), FailoverError> {
        let view = self.view();

        if let CoordinatorState::Halted { detail } = &view.state {
            return Err(FailoverError::InvariantViolation {
                topology_id: self.topology_id.clone(),
                detail: detail.clone(),
            });
        }

        let replica = view
            .replicas
            .iter()
            .find(|r| r.id == candidate_id)
            .ok_or_else(|| FailoverError::UnknownReplica {
                topology_id: self.topology_id.clone(),
                replica_id: candidate_id.to_string(),
            })?;

        if replica.role != ReplicaRole::Secondary {
            return Err(FailoverError::IneligibleCandidate {
                topology_id: self.topology_id.clone(),
                replica_id: candidate_id.to_string(),
            });
        }

        tracing::info!(
            topology_id = %self.topology_id,
            candidate = %candidate_id,
            "manual failover requested"
        );
        *self.pending_manual.lock() = Some(candidate_id.to_string());
        self.wake.notify_one();
        Ok(())
    }

    /// One coordination step: probe, track, decide, and possibly promote.
    ///
    /// Every call emits a [`RunEvent`], successful or not.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<RunReport, FailoverError> {
        let started = Instant::now();
        let mut inner = self.inner.lock().await;

        let mut decision = None;
        let result = self.run_locked(&mut inner, now, &mut decision).await;
        self.refresh_view(&inner);
        drop(inner);

        let event = RunEvent {
            id: Uuid::new_v4(),
            topology_id: self.topology_id.clone(),
            at: now,
            decision: decision.clone(),
            did_failover: matches!(result, Ok(true)),
            latency_ms: started.elapsed().as_millis() as u64,
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        self.ports.events.emit(&event);

        result.map(|did_failover| RunReport {
            did_failover,
            decision,
        })
    }

    async fn run_locked(
        &self,
        inner: &mut Inner,
        now: DateTime<Utc>,
        decision_out: &mut Option<FailoverDecision>,
    ) -> Result<bool, FailoverError> {
        match &inner.state {
            CoordinatorState::Halted { detail } => {
                self.discard_manual_request();
                return Err(FailoverError::InvariantViolation {
                    topology_id: self.topology_id.clone(),
                    detail: detail.clone(),
                });
            }
            CoordinatorState::ReconcilePending | CoordinatorState::FailoverInProgress => {
                if let Err(e) = self.reconcile(inner).await {
                    self.discard_manual_request();
                    return Err(e);
                }
            }
            CoordinatorState::Stable => {}
        }

        let samples = self.collect_samples(&inner.topology, now).await;
        for sample in &samples {
            if let Err(e) = inner.tracker.record(sample) {
                tracing::error!(topology_id = %self.topology_id, error = %e, "discarding health sample");
            }
        }

        let lag = inner.tracker.snapshot();
        let threshold = self.config.unreachable_threshold;
        let ids: Vec<String> = inner.topology.replicas().iter().map(|r| r.id.clone()).collect();
        for id in ids {
            let unreachable = lag.get(&id).map(|s| s.is_unreachable(threshold)).unwrap_or(false);
            if inner.topology.mark_reachability(&id, !unreachable) {
                tracing::info!(
                    topology_id = %self.topology_id,
                    replica_id = %id,
                    reachable = !unreachable,
                    "secondary reachability changed"
                );
            }
        }

        let manual = self.pending_manual.lock().take();
        let decision = FailoverPolicyEngine::evaluate(
            &inner.topology,
            &lag,
            now,
            manual.as_deref(),
            &self.config,
        );
        *decision_out = Some(decision.clone());

        if !decision.should_failover {
            self.publish(inner)?;
            return match (decision.reason, manual) {
                (DecisionReason::ManualRequest, Some(candidate)) => {
                    Err(FailoverError::IneligibleCandidate {
                        topology_id: self.topology_id.clone(),
                        replica_id: candidate,
                    })
                }
                (DecisionReason::NoSafeCandidate, _) => {
                    tracing::warn!(
                        topology_id = %self.topology_id,
                        "primary unreachable but no secondary is safe to promote"
                    );
                    Err(FailoverError::NoSafeCandidate {
                        topology_id: self.topology_id.clone(),
                    })
                }
                _ => Ok(false),
            };
        }

        let Some(candidate) = decision.candidate_replica_id.clone() else {
            return Ok(false);
        };
        self.promote(inner, &candidate, &decision).await
    }

    /// Probe every replica concurrently, each bounded by the probe timeout.
    async fn collect_samples(&self, topology: &Topology, now: DateTime<Utc>) -> Vec<HealthSample> {
        let timeout = self.settings.probe_timeout;
        let probes = topology.replicas().iter().map(|replica| async move {
            match tokio::time::timeout(timeout, self.ports.probe.check(replica, timeout)).await {
                Ok(sample) => sample,
                Err(_) => {
                    tracing::warn!(
                        topology_id = %self.topology_id,
                        replica_id = %replica.id,
                        "health probe timed out"
                    );
                    HealthSample::unreachable(replica.id.clone(), now)
                }
            }
        });
        futures::future::join_all(probes).await
    }

    /// Execute the promotion transaction.
    ///
    /// Roles are committed only after the backend confirms. A definitive
    /// rejection rolls the markers back; an ambiguous failure reconciles
    /// against the backend instead of retrying.
    async fn promote(
        &self,
        inner: &mut Inner,
        candidate: &str,
        decision: &FailoverDecision,
    ) -> Result<bool, FailoverError> {
        let marker = inner.topology.begin_promotion(candidate)?;
        inner.state = CoordinatorState::FailoverInProgress;

        tracing::info!(
            topology_id = %self.topology_id,
            candidate = %candidate,
            old_primary = %marker.old_primary,
            reason = %decision.reason,
            data_loss_risk = decision.data_loss_risk,
            "starting failover"
        );

        let outcome = match tokio::time::timeout(
            self.settings.promotion_timeout,
            self.ports.executor.promote(&self.topology_id, candidate),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::Timeout),
        };

        match outcome {
            Ok(()) => {
                inner.topology.commit_promotion(&marker)?;
                inner.state = CoordinatorState::Stable;
                self.publish(inner)?;
                self.log_committed(&marker, decision);
                Ok(true)
            }
            Err(e) if !e.is_ambiguous() => {
                let reason = match e {
                    ExecutorError::Rejected(reason) => reason,
                    other => other.to_string(),
                };
                inner.topology.rollback_promotion(&marker)?;
                inner.state = CoordinatorState::Stable;
                tracing::error!(
                    topology_id = %self.topology_id,
                    candidate = %candidate,
                    reason = %decision.reason,
                    data_loss_risk = decision.data_loss_risk,
                    error = %reason,
                    "promotion rejected, roles rolled back"
                );
                Err(FailoverError::PromotionRejected {
                    topology_id: self.topology_id.clone(),
                    candidate_id: candidate.to_string(),
                    reason,
                    data_loss_risk: decision.data_loss_risk,
                })
            }
            Err(e) => {
                tracing::error!(
                    topology_id = %self.topology_id,
                    candidate = %candidate,
                    reason = %decision.reason,
                    error = %e,
                    "promotion outcome unknown, reconciling with backend"
                );
                inner.state = CoordinatorState::ReconcilePending;
                self.settle_ambiguous(inner, &marker, decision).await
            }
        }
    }

    async fn settle_ambiguous(
        &self,
        inner: &mut Inner,
        marker: &PromotionMarker,
        decision: &FailoverDecision,
    ) -> Result<bool, FailoverError> {
        let timeout_error = FailoverError::PromotionTimeout {
            topology_id: self.topology_id.clone(),
            candidate_id: marker.candidate.clone(),
        };

        match self.reconcile(inner).await {
            Ok(primary) if primary == marker.candidate => {
                self.log_committed(marker, decision);
                Ok(true)
            }
            Ok(_) => Err(timeout_error),
            Err(e @ FailoverError::InvariantViolation { .. }) => Err(e),
            Err(_) => Err(timeout_error),
        }
    }

    fn log_committed(&self, marker: &PromotionMarker, decision: &FailoverDecision) {
        if decision.data_loss_risk {
            tracing::warn!(
                topology_id = %self.topology_id,
                new_primary = %marker.candidate,
                old_primary = %marker.old_primary,
                reason = %decision.reason,
                "failover committed to an async replica, recent writes may be lost"
            );
        } else {
            tracing::info!(
                topology_id = %self.topology_id,
                new_primary = %marker.candidate,
                old_primary = %marker.old_primary,
                reason = %decision.reason,
                "failover committed"
            );
        }
    }

    /// Adopt the backend's view of the primary.
    ///
    /// Exactly one known primary is accepted. Anything else halts the
    /// topology until an operator resolves it.
    async fn reconcile(&self, inner: &mut Inner) -> Result<String, FailoverError> {
        let observed = match tokio::time::timeout(
            self.settings.promotion_timeout,
            self.ports.executor.observed_primaries(&self.topology_id),
        )
        .await
        {
            Ok(Ok(observed)) => observed,
            Ok(Err(e)) => {
                return Err(FailoverError::ReconcileFailed {
                    topology_id: self.topology_id.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(FailoverError::ReconcileFailed {
                    topology_id: self.topology_id.clone(),
                    reason: ExecutorError::Timeout.to_string(),
                })
            }
        };

        let mut primaries = observed;
        primaries.sort();
        primaries.dedup();

        match primaries.as_slice() {
            [primary] if inner.topology.contains(primary) => {
                let cached = inner.topology.primary().map(|r| r.id.clone());
                let in_flight = inner.topology.in_flight();
                inner.topology.adopt_primary(primary)?;
                inner.state = CoordinatorState::Stable;

                if in_flight.is_none() && cached.as_deref() != Some(primary.as_str()) {
                    tracing::warn!(
                        topology_id = %self.topology_id,
                        cached = ?cached,
                        observed = %primary,
                        "backend primary differs from cached topology"
                    );
                } else {
                    tracing::info!(
                        topology_id = %self.topology_id,
                        primary = %primary,
                        "topology reconciled"
                    );
                }

                self.publish(inner)?;
                Ok(primary.clone())
            }
            _ => {
                let detail = format!("backend reports primaries {:?}", primaries);
                tracing::error!(
                    topology_id = %self.topology_id,
                    detail = %detail,
                    "invariant violation, halting automatic failover"
                );
                inner.state = CoordinatorState::Halted {
                    detail: detail.clone(),
                };
                Err(FailoverError::InvariantViolation {
                    topology_id: self.topology_id.clone(),
                    detail,
                })
            }
        }
    }

    /// Operator override: declare the true primary and leave `Halted`
    /// (or a stuck `ReconcilePending`).
    pub async fn resolve_halt(&self, primary_id: &str) -> Result<(), FailoverError> {
        let mut inner = self.inner.lock().await;
        if inner.state == CoordinatorState::Stable {
            return Ok(());
        }

        inner.topology.adopt_primary(primary_id)?;
        inner.state = CoordinatorState::Stable;
        self.discard_manual_request();
        tracing::warn!(
            topology_id = %self.topology_id,
            primary = %primary_id,
            "topology resolved by operator"
        );
        let published = self.publish(&inner);
        self.refresh_view(&inner);
        published
    }

    /// Add a secondary. Only permitted in `Stable`.
    pub async fn add_secondary(
        &self,
        replica: Replica,
        now: DateTime<Utc>,
    ) -> Result<(), FailoverError> {
        let mut inner = self.inner.lock().await;
        self.require_stable(&inner)?;

        let id = replica.id.clone();
        inner.topology.add_secondary(replica)?;
        inner.tracker.track(id.clone(), now);
        tracing::info!(topology_id = %self.topology_id, replica_id = %id, "secondary added");

        let published = self.publish(&inner);
        self.refresh_view(&inner);
        published
    }

    /// Remove a secondary. Only permitted in `Stable`.
    pub async fn remove_secondary(&self, replica_id: &str) -> Result<Replica, FailoverError> {
        let mut inner = self.inner.lock().await;
        self.require_stable(&inner)?;

        let removed = inner.topology.remove_secondary(replica_id)?;
        inner.tracker.untrack(replica_id);
        tracing::info!(topology_id = %self.topology_id, replica_id = %replica_id, "secondary removed");

        self.publish(&inner)?;
        self.refresh_view(&inner);
        Ok(removed)
    }

    /// Drop a queued operator request that can no longer be honored.
    fn discard_manual_request(&self) {
        if let Some(candidate) = self.pending_manual.lock().take() {
            tracing::warn!(
                topology_id = %self.topology_id,
                candidate = %candidate,
                "discarding queued manual failover"
            );
        }
    }

    fn require_stable(&self, inner: &Inner) -> Result<(), FailoverError> {
        match &inner.state {
            CoordinatorState::Stable => Ok(()),
            CoordinatorState::Halted { detail } => Err(FailoverError::InvariantViolation {
                topology_id: self.topology_id.clone(),
                detail: detail.clone(),
            }),
            _ => Err(FailoverError::FailoverInProgress(self.topology_id.clone())),
        }
    }

    fn publish(&self, inner: &Inner) -> Result<(), FailoverError> {
        let lag = inner.tracker.snapshot();
        self.router
            .publish(&inner.topology, &lag, self.config.unreachable_threshold)
            .map(|_| ())
    }

    fn refresh_view(&self, inner: &Inner) {
        *self.view.write() = Self::build_view(inner, &self.config);
    }

    fn build_view(inner: &Inner, config: &FailoverGroupConfig) -> TopologyView {
        TopologyView {
            topology_id: inner.topology.id().to_string(),
            state: inner.state.clone(),
            config: config.clone(),
            replicas: inner.topology.replicas().to_vec(),
            lag: inner.tracker.snapshot().into_iter().collect(),
            updated_at: Utc::now(),
        }
    }
}
