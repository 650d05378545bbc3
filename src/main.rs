//! Failover Coordinator - Replication and failover control plane
//!
//! This is the composition root that wires together all the components.

use chrono::Utc;
use failover_coordinator::adapters::inbound::{ApiServer, ApiState};
use failover_coordinator::adapters::outbound::{
    HttpExecutorConfig, HttpPromotionExecutor, NetworkHealthProbe, ProbeKind, TracingEventSink,
};
use failover_coordinator::config::{load_config, load_topologies};
use failover_coordinator::domain::ports::{EventSink, HealthProbe, PromotionExecutor};
use failover_coordinator::infrastructure::{shutdown_signal, ShutdownController};
use failover_coordinator::{
    Coordinator, CoordinatorPorts, CoordinatorSettings, CoordinatorSupervisor, EndpointRouter,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(log_level).init();

    let topologies = load_topologies(&cfg.topology_path)?;
    tracing::info!(
        "starting failover coordinator topologies={} file={} tick={}s",
        topologies.len(),
        cfg.topology_path,
        cfg.tick_interval_secs
    );

    // ===== COMPOSITION ROOT =====

    // 1. Outbound adapters
    let probe_kind = match cfg.probe_kind.as_str() {
        "http" => ProbeKind::Http {
            path: cfg.probe_path.clone(),
        },
        _ => ProbeKind::Tcp,
    };
    let probe: Arc<dyn HealthProbe> = Arc::new(NetworkHealthProbe::new(probe_kind));

    let executor: Arc<dyn PromotionExecutor> =
        Arc::new(HttpPromotionExecutor::new(HttpExecutorConfig {
            base_url: cfg.executor_url.clone(),
            request_timeout: Duration::from_secs(cfg.promotion_timeout_secs),
        })?);

    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink::new(cfg.event_history));

    // 2. Application services
    let router = Arc::new(EndpointRouter::new());
    let shutdown = ShutdownController::new();
    let supervisor = Arc::new(CoordinatorSupervisor::new(
        Duration::from_secs(cfg.tick_interval_secs),
        shutdown.clone(),
    ));

    let settings = CoordinatorSettings {
        probe_timeout: Duration::from_secs(cfg.probe_timeout_secs),
        promotion_timeout: Duration::from_secs(cfg.promotion_timeout_secs),
        lag_alpha: cfg.lag_alpha,
    };
    let ports = CoordinatorPorts {
        probe,
        executor,
        events: events.clone(),
    };

    for (topology, group) in topologies {
        let coordinator = Coordinator::new(
            topology,
            group,
            settings.clone(),
            ports.clone(),
            router.clone(),
            Utc::now(),
        )?;
        supervisor.register(Arc::new(coordinator))?;
    }

    // 3. Inbound adapter
    if cfg.api_enabled {
        let api = ApiServer::new(
            cfg.api_listen_addr.clone(),
            ApiState::new(supervisor.clone(), router.clone(), events.clone()),
        );
        tokio::spawn(async move {
            if let Err(e) = api.run().await {
                tracing::error!("admin API stopped: {:?}", e);
            }
        });
    }

    // 4. Run until signalled, then let in-flight runs finish
    supervisor.start();
    shutdown_signal(shutdown.clone()).await;

    if !shutdown
        .wait_for_drain(Duration::from_secs(cfg.drain_timeout_secs))
        .await
    {
        tracing::warn!("exiting with coordinator runs still in flight");
        return Ok(());
    }
    supervisor.join().await;

    tracing::info!("failover coordinator stopped");
    Ok(())
}
