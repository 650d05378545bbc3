//! Integration tests for the failover coordinator
//!
//! Drives coordinators through full scenarios with in-memory probes and
//! promotion backends.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use failover_coordinator::{
    Coordinator, CoordinatorPorts, CoordinatorSettings, CoordinatorState, CoordinatorSupervisor,
    DecisionReason, EndpointRouter, EventSink, ExecutorError, FailoverError, FailoverGroupConfig,
    FailoverPolicy, HealthProbe, HealthSample, PromotionExecutor, Replica, ReplicaRole,
    ReplicationMode, RunEvent, Topology,
};
use failover_coordinator::infrastructure::ShutdownController;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Probe reporting a fixed set of replicas as down, stamped with the clock
/// the test sets before each run.
#[derive(Default)]
struct ScriptedProbe {
    down: Mutex<HashSet<String>>,
    clock: Mutex<Option<DateTime<Utc>>>,
}

impl ScriptedProbe {
    fn set_down(&self, id: &str, down: bool) {
        let mut set = self.down.lock();
        if down {
            set.insert(id.to_string());
        } else {
            set.remove(id);
        }
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn check(&self, replica: &Replica, _timeout: Duration) -> HealthSample {
        let at = self.clock.lock().unwrap_or_else(Utc::now);
        if self.down.lock().contains(&replica.id) {
            HealthSample::unreachable(replica.id.clone(), at)
        } else {
            HealthSample::reachable(replica.id.clone(), at, 20)
        }
    }
}

/// Backend that tracks the primary and can be told how to answer.
struct Backend {
    primaries: Mutex<Vec<String>>,
    promote_error: Mutex<Option<ExecutorError>>,
    apply_despite_error: Mutex<bool>,
    promotions: AtomicUsize,
}

impl Backend {
    fn new(primary: &str) -> Self {
        Self {
            primaries: Mutex::new(vec![primary.to_string()]),
            promote_error: Mutex::new(None),
            apply_despite_error: Mutex::new(false),
            promotions: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PromotionExecutor for Backend {
    async fn promote(&self, _topology_id: &str, candidate: &str) -> Result<(), ExecutorError> {
        self.promotions.fetch_add(1, Ordering::SeqCst);
        let error = self.promote_error.lock().clone();
        if error.is_none() || *self.apply_despite_error.lock() {
            *self.primaries.lock() = vec![candidate.to_string()];
        }
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn observed_primaries(&self, _topology_id: &str) -> Result<Vec<String>, ExecutorError> {
        Ok(self.primaries.lock().clone())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<RunEvent>>,
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &RunEvent) {
        self.events.lock().push(event.clone());
    }

    fn recent(&self, topology_id: &str) -> Vec<RunEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.topology_id == topology_id)
            .cloned()
            .collect()
    }
}

struct Scenario {
    coordinator: Arc<Coordinator>,
    probe: Arc<ScriptedProbe>,
    backend: Arc<Backend>,
    events: Arc<RecordingSink>,
    router: Arc<EndpointRouter>,
}

impl Scenario {
    fn new(replicas: Vec<Replica>, config: FailoverGroupConfig) -> Self {
        let primary = replicas
            .iter()
            .find(|r| r.role == ReplicaRole::Primary)
            .map(|r| r.id.clone())
            .unwrap();
        let topology = Topology::new("orders", replicas).unwrap();

        let probe = Arc::new(ScriptedProbe::default());
        let backend = Arc::new(Backend::new(&primary));
        let events = Arc::new(RecordingSink::default());
        let router = Arc::new(EndpointRouter::new());

        let coordinator = Coordinator::new(
            topology,
            config,
            CoordinatorSettings::default(),
            CoordinatorPorts {
                probe: probe.clone(),
                executor: backend.clone(),
                events: events.clone(),
            },
            router.clone(),
            ts(0),
        )
        .unwrap();

        Self {
            coordinator: Arc::new(coordinator),
            probe,
            backend,
            events,
            router,
        }
    }

    async fn run_at(&self, secs: i64) -> Result<bool, FailoverError> {
        *self.probe.clock.lock() = Some(ts(secs));
        self.coordinator
            .run_once(ts(secs))
            .await
            .map(|report| report.did_failover)
    }

    fn role(&self, id: &str) -> ReplicaRole {
        self.coordinator
            .view()
            .replicas
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.role)
            .unwrap()
    }

    fn roles(&self) -> Vec<(String, ReplicaRole)> {
        let mut roles: Vec<_> = self
            .coordinator
            .view()
            .replicas
            .iter()
            .map(|r| (r.id.clone(), r.role))
            .collect();
        roles.sort();
        roles
    }
}

fn two_node() -> Vec<Replica> {
    vec![
        Replica::new("P", "east", ReplicaRole::Primary, 0, ReplicationMode::Sync),
        Replica::new("S1", "west", ReplicaRole::Secondary, 1, ReplicationMode::Sync),
    ]
}

fn three_node() -> Vec<Replica> {
    vec![
        Replica::new("P", "east", ReplicaRole::Primary, 0, ReplicationMode::Sync),
        Replica::new("S1", "west", ReplicaRole::Secondary, 1, ReplicationMode::Async),
        Replica::new("S2", "north", ReplicaRole::Secondary, 2, ReplicationMode::Sync),
    ]
}

/// Primary fails from t=1; promotion happens once the threshold is met and
/// the grace period has elapsed.
#[tokio::test]
async fn test_end_to_end_automatic_failover() {
    let s = Scenario::new(two_node(), FailoverGroupConfig::new(FailoverPolicy::Automatic, 2, 3));
    s.probe.set_down("P", true);

    assert_eq!(assert_ok!(s.run_at(1).await), false);
    assert_eq!(assert_ok!(s.run_at(2).await), false);
    assert_eq!(assert_ok!(s.run_at(3).await), true);

    assert_eq!(s.role("P"), ReplicaRole::Secondary);
    assert_eq!(s.role("S1"), ReplicaRole::Primary);
    assert_eq!(s.router.resolve_read_write("orders").unwrap(), "S1");

    // P never answered, so the grace timer ran from the start of tracking
    let events = s.events.recent("orders");
    let decision = events.last().unwrap().decision.clone().unwrap();
    assert_eq!(decision.reason, DecisionReason::PrimaryUnreachable);

    // Remaining samples do not trigger another failover
    assert_eq!(assert_ok!(s.run_at(4).await), false);
    assert_eq!(assert_ok!(s.run_at(5).await), false);
    assert_eq!(s.backend.promotions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_grace_period_holds_flapping_primary() {
    let s = Scenario::new(three_node(), FailoverGroupConfig::new(FailoverPolicy::Automatic, 10, 2));
    assert_ok!(s.run_at(0).await);

    // Short outages never outlast the grace period
    for cycle in 0..5 {
        let base = 1 + cycle * 4;
        s.probe.set_down("P", true);
        assert_eq!(assert_ok!(s.run_at(base).await), false);
        assert_eq!(assert_ok!(s.run_at(base + 1).await), false);
        s.probe.set_down("P", false);
        assert_eq!(assert_ok!(s.run_at(base + 2).await), false);
    }
    assert_eq!(s.role("P"), ReplicaRole::Primary);

    let held: Vec<DecisionReason> = s
        .events
        .recent("orders")
        .iter()
        .filter_map(|e| e.decision.as_ref().map(|d| d.reason))
        .collect();
    assert!(held.contains(&DecisionReason::GracePeriodPending));
}

#[tokio::test]
async fn test_manual_policy_never_fails_over_automatically() {
    let s = Scenario::new(three_node(), FailoverGroupConfig::new(FailoverPolicy::Manual, 0, 3));
    s.probe.set_down("P", true);

    for t in 1..=100 {
        assert_eq!(assert_ok!(s.run_at(t).await), false);
    }
    assert_eq!(s.role("P"), ReplicaRole::Primary);
    assert_eq!(s.backend.promotions.load(Ordering::SeqCst), 0);

    assert_ok!(s.coordinator.request_failover("S2"));
    assert_eq!(assert_ok!(s.run_at(101).await), true);
    assert_eq!(s.role("S2"), ReplicaRole::Primary);
    assert_eq!(s.router.resolve_read_write("orders").unwrap(), "S2");
}

#[tokio::test]
async fn test_failing_executor_rolls_back() {
    let s = Scenario::new(three_node(), FailoverGroupConfig::new(FailoverPolicy::Automatic, 0, 1));
    assert_ok!(s.run_at(0).await);
    let before = s.roles();

    *s.backend.promote_error.lock() = Some(ExecutorError::Rejected("busy".to_string()));
    s.probe.set_down("P", true);

    for t in 1..=3 {
        let err = assert_err!(s.run_at(t).await);
        assert!(matches!(err, FailoverError::PromotionRejected { .. }));
        assert_eq!(s.roles(), before);
        assert_eq!(s.coordinator.view().state, CoordinatorState::Stable);
    }

    let roles = s.roles();
    assert!(roles
        .iter()
        .all(|(_, role)| *role != ReplicaRole::Promoting && *role != ReplicaRole::Demoted));
}

#[tokio::test]
async fn test_async_candidate_reports_data_loss_risk() {
    let s = Scenario::new(three_node(), FailoverGroupConfig::new(FailoverPolicy::Automatic, 0, 1));
    assert_ok!(s.run_at(0).await);

    *s.backend.promote_error.lock() = Some(ExecutorError::Rejected("lagging".to_string()));
    s.probe.set_down("P", true);

    // S1 is preferred and asynchronous
    match assert_err!(s.run_at(1).await) {
        FailoverError::PromotionRejected {
            candidate_id,
            data_loss_risk,
            ..
        } => {
            assert_eq!(candidate_id, "S1");
            assert!(data_loss_risk);
        }
        other => panic!("Expected PromotionRejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_timeout_after_backend_applied_promotion() {
    let s = Scenario::new(three_node(), FailoverGroupConfig::new(FailoverPolicy::Automatic, 0, 1));
    assert_ok!(s.run_at(0).await);

    *s.backend.promote_error.lock() = Some(ExecutorError::Timeout);
    *s.backend.apply_despite_error.lock() = true;
    s.probe.set_down("P", true);

    assert_eq!(assert_ok!(s.run_at(1).await), true);
    assert_eq!(s.role("S1"), ReplicaRole::Primary);
    assert_eq!(s.coordinator.view().state, CoordinatorState::Stable);
    assert_eq!(s.backend.promotions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_split_brain_halts_until_resolved() {
    let s = Scenario::new(three_node(), FailoverGroupConfig::new(FailoverPolicy::Automatic, 0, 1));
    *s.backend.primaries.lock() = vec!["P".to_string(), "S2".to_string()];

    let err = assert_err!(s.run_at(0).await);
    assert!(matches!(err, FailoverError::InvariantViolation { .. }));
    assert!(!err.is_transient());

    // Even a dead primary does not trigger a failover while halted
    s.probe.set_down("P", true);
    assert_err!(s.run_at(1).await);
    assert_eq!(s.backend.promotions.load(Ordering::SeqCst), 0);
    assert!(s.router.resolve_read_write("orders").is_err());

    *s.backend.primaries.lock() = vec!["S2".to_string()];
    assert_ok!(s.coordinator.resolve_halt("S2").await);
    assert_eq!(s.router.resolve_read_write("orders").unwrap(), "S2");
    assert_eq!(s.role("P"), ReplicaRole::Secondary);
}

#[tokio::test]
async fn test_removed_replica_is_no_longer_probed_or_routed() {
    let s = Scenario::new(three_node(), FailoverGroupConfig::default());
    assert_ok!(s.run_at(0).await);
    assert_eq!(s.router.resolve_read_only("orders").unwrap().len(), 2);

    assert_ok!(s.coordinator.remove_secondary("S2").await);
    assert_ok!(s.run_at(1).await);
    assert_eq!(
        s.router.resolve_read_only("orders").unwrap(),
        vec!["S1".to_string()]
    );
    assert!(!s.coordinator.view().lag.contains_key("S2"));
}

/// Random outage schedules never leave the topology without exactly one
/// primary once a run completes.
#[tokio::test]
async fn test_exactly_one_primary_under_random_outages() {
    let mut rng = StdRng::seed_from_u64(0x9e37_79b9_7f4a_7c15);

    for _ in 0..20 {
        let s = Scenario::new(three_node(), FailoverGroupConfig::new(FailoverPolicy::Automatic, 1, 2));
        let ids = ["P", "S1", "S2"];

        for t in 0..40 {
            for id in ids {
                s.probe.set_down(id, rng.gen_bool(1.0 / 3.0));
            }
            if rng.gen_range(0..7) == 0 {
                *s.backend.promote_error.lock() = Some(ExecutorError::Rejected("no".to_string()));
            } else {
                *s.backend.promote_error.lock() = None;
            }

            let _ = s.run_at(t).await;

            let view = s.coordinator.view();
            let primaries = view
                .replicas
                .iter()
                .filter(|r| r.role == ReplicaRole::Primary)
                .count();
            assert_eq!(primaries, 1, "Expected exactly one primary at t={}", t);
            assert!(view.replicas.iter().all(|r| !r.role.is_transient()));
            assert_eq!(
                s.router.resolve_read_write("orders").unwrap(),
                view.primary().unwrap().id
            );
        }
    }
}

#[tokio::test]
async fn test_supervisor_runs_many_topologies() {
    let shutdown = ShutdownController::new();
    let supervisor = CoordinatorSupervisor::new(Duration::from_millis(10), shutdown.clone());
    let router = Arc::new(EndpointRouter::new());
    let probe = Arc::new(ScriptedProbe::default());

    for (i, id) in ["alpha", "beta", "gamma"].iter().enumerate() {
        let topology = Topology::new(
            *id,
            vec![
                Replica::new("P", "east", ReplicaRole::Primary, 0, ReplicationMode::Sync),
                Replica::new("S1", "west", ReplicaRole::Secondary, i as i32, ReplicationMode::Sync),
            ],
        )
        .unwrap();
        let coordinator = Coordinator::new(
            topology,
            FailoverGroupConfig::default(),
            CoordinatorSettings::default(),
            CoordinatorPorts {
                probe: probe.clone(),
                executor: Arc::new(Backend::new("P")),
                events: Arc::new(RecordingSink::default()),
            },
            router.clone(),
            Utc::now(),
        )
        .unwrap();
        supervisor.register(Arc::new(coordinator)).unwrap();
    }

    supervisor.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.shutdown();
    assert!(shutdown.wait_for_drain(Duration::from_secs(1)).await);
    supervisor.join().await;

    for id in supervisor.topology_ids() {
        assert_eq!(router.resolve_read_write(&id).unwrap(), "P");
        assert_eq!(
            supervisor.get(&id).unwrap().view().state,
            CoordinatorState::Stable
        );
    }
}
