use crate::domain::entities::{FailoverGroupConfig, Replica};
use crate::domain::services::Topology;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Process configuration, read from the environment.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub topology_path: String,
    pub tick_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub promotion_timeout_secs: u64,
    pub lag_alpha: f64,
    pub debug: bool,

    // Health probe settings
    pub probe_kind: String,
    pub probe_path: String,

    // Promotion backend
    pub executor_url: String,

    // Admin API settings
    pub api_enabled: bool,
    pub api_listen_addr: String,

    pub event_history: usize,
    pub drain_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            topology_path: "topology.json".to_string(),
            tick_interval_secs: 10,
            probe_timeout_secs: 5,
            promotion_timeout_secs: 30,
            lag_alpha: 0.3,
            debug: false,
            probe_kind: "tcp".to_string(),
            probe_path: "/health".to_string(),
            executor_url: "http://127.0.0.1:9090".to_string(),
            api_enabled: false,
            api_listen_addr: "0.0.0.0:8081".to_string(),
            event_history: 100,
            drain_timeout_secs: 35,
        }
    }
}

pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(|key| std::env::var(key).ok())
}

/// Build the configuration from an arbitrary variable lookup.
///
/// Unparseable numbers fall back to their defaults; out-of-range values
/// are rejected.
pub fn load_config_from<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();

    let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
    let flag = |key: &str| {
        lookup(key)
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false)
    };

    let topology_path = string("FAILOVER_TOPOLOGY_PATH", &defaults.topology_path);

    let tick_interval_secs = lookup("FAILOVER_TICK_INTERVAL_SECS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.tick_interval_secs);

    let probe_timeout_secs = lookup("FAILOVER_PROBE_TIMEOUT_SECS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.probe_timeout_secs);

    let promotion_timeout_secs = lookup("FAILOVER_PROMOTION_TIMEOUT_SECS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.promotion_timeout_secs);

    let lag_alpha = lookup("FAILOVER_LAG_ALPHA")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.lag_alpha);

    let debug = lookup("DEBUG").is_some();

    let probe_kind = string("FAILOVER_PROBE_KIND", &defaults.probe_kind).to_lowercase();
    let probe_path = string("FAILOVER_PROBE_PATH", &defaults.probe_path);

    let executor_url = string("FAILOVER_EXECUTOR_URL", &defaults.executor_url);

    let api_enabled = flag("FAILOVER_API_ENABLED");
    let api_listen_addr = string("FAILOVER_API_LISTEN_ADDR", &defaults.api_listen_addr);

    let event_history = lookup("FAILOVER_EVENT_HISTORY")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.event_history);

    let drain_timeout_secs = lookup("FAILOVER_DRAIN_TIMEOUT_SECS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.drain_timeout_secs);

    if tick_interval_secs == 0 {
        anyhow::bail!("FAILOVER_TICK_INTERVAL_SECS must be at least 1");
    }
    if !(lag_alpha > 0.0 && lag_alpha <= 1.0) {
        anyhow::bail!("FAILOVER_LAG_ALPHA must be in (0, 1], got {}", lag_alpha);
    }
    if probe_kind != "tcp" && probe_kind != "http" {
        anyhow::bail!("FAILOVER_PROBE_KIND must be tcp or http, got {}", probe_kind);
    }

    Ok(Config {
        topology_path,
        tick_interval_secs,
        probe_timeout_secs,
        promotion_timeout_secs,
        lag_alpha,
        debug,
        probe_kind,
        probe_path,
        executor_url,
        api_enabled,
        api_listen_addr,
        event_history,
        drain_timeout_secs,
    })
}

/// Topology file root.
#[derive(Debug, Clone, Deserialize)]
pub struct TopologyFile {
    pub topologies: Vec<TopologySpec>,
}

/// One topology as declared in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct TopologySpec {
    pub id: String,
    #[serde(flatten)]
    pub group: FailoverGroupConfig,
    pub replicas: Vec<Replica>,
}

impl TopologySpec {
    /// Validate and split into a topology and its group settings.
    pub fn build(self) -> anyhow::Result<(Topology, FailoverGroupConfig)> {
        self.group.validate()?;
        let topology = Topology::new(self.id, self.replicas)?;
        Ok((topology, self.group))
    }
}

/// Parse and validate a topology document.
pub fn parse_topologies(json: &str) -> anyhow::Result<Vec<(Topology, FailoverGroupConfig)>> {
    let file: TopologyFile = serde_json::from_str(json)?;

    let mut seen = HashSet::new();
    let mut topologies = Vec::with_capacity(file.topologies.len());
    for spec in file.topologies {
        if !seen.insert(spec.id.clone()) {
            anyhow::bail!("duplicate topology id {}", spec.id);
        }
        topologies.push(spec.build()?);
    }
    Ok(topologies)
}

/// Read and validate the topology file at `path`.
pub fn load_topologies(path: impl AsRef<Path>) -> anyhow::Result<Vec<(Topology, FailoverGroupConfig)>> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read topology file {}: {}", path.display(), e))?;
    parse_topologies(&json)
}
