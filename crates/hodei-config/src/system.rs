//! Orchestrator system configuration: resource pools, scheduler strategy
//! selection, and heartbeat/scheduling intervals (spec.md §4.2-§4.6, §9).
//!
//! The pipeline definition DSL itself stays out of scope (spec.md §1); this
//! only covers the operator-facing system settings, the same split
//! `buildit-config` drew between its pipeline-DSL parser and its
//! system-config parser.

use std::time::Duration;

use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EphemeralSetting {
    AfterEachJob,
    AfterIdleTimeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    pub provider: String,
    pub max_workers: u32,
    pub labels: Vec<String>,
    pub ephemeral: Option<EphemeralSetting>,
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeastLoadedWeights {
    pub cpu: f64,
    pub mem: f64,
    pub active_ratio: f64,
}

impl Default for LeastLoadedWeights {
    fn default() -> Self {
        Self {
            cpu: 1.0 / 3.0,
            mem: 1.0 / 3.0,
            active_ratio: 1.0 / 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Name of the registered `SchedulingStrategy` to use: one of
    /// `round-robin`, `least-loaded`, `greedy-best-fit`, `bin-packing`.
    pub strategy: String,
    pub least_loaded_weights: LeastLoadedWeights,
    pub tick_interval: Duration,
    /// Utilization samples older than this are treated as stale and the
    /// pool is deprioritized by `least-loaded` as if fully loaded.
    pub utilization_max_age: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: "least-loaded".to_string(),
            least_loaded_weights: LeastLoadedWeights::default(),
            tick_interval: Duration::from_secs(1),
            utilization_max_age: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub missed_beats: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            missed_beats: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub pools: Vec<PoolConfig>,
    pub scheduler: SchedulerConfig,
    pub heartbeat: HeartbeatConfig,
    pub utilization_poll_interval: Duration,
    pub default_max_wait_time: Duration,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            pools: Vec::new(),
            scheduler: SchedulerConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            utilization_poll_interval: Duration::from_secs(5),
            default_max_wait_time: Duration::from_secs(300),
        }
    }
}

fn entry_as_i64(node: &KdlNode, field: &str) -> Option<i64> {
    node.iter_children()
        .find(|n| n.name().value() == field)
        .and_then(|n| n.entries().first().and_then(|e| e.value().as_integer()))
        .map(|v| v as i64)
}

fn entry_as_f64(node: &KdlNode, field: &str) -> Option<f64> {
    node.iter_children()
        .find(|n| n.name().value() == field)
        .and_then(|n| n.entries().first().and_then(|e| e.value().as_float()))
}

fn entry_as_string(node: &KdlNode, field: &str) -> Option<String> {
    node.iter_children()
        .find(|n| n.name().value() == field)
        .and_then(|n| n.entries().first().and_then(|e| e.value().as_string()))
        .map(str::to_string)
}

fn parse_pool(node: &KdlNode) -> ConfigResult<PoolConfig> {
    let name = node
        .entries()
        .first()
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| ConfigError::MissingField("pool name".to_string()))?
        .to_string();

    let provider = entry_as_string(node, "provider")
        .ok_or_else(|| ConfigError::MissingField(format!("pool '{name}' missing provider")))?;

    let max_workers = entry_as_i64(node, "max-workers")
        .ok_or_else(|| ConfigError::MissingField(format!("pool '{name}' missing max-workers")))?
        as u32;

    let labels = node
        .iter_children()
        .find(|n| n.name().value() == "labels")
        .map(|n| {
            n.entries()
                .iter()
                .filter_map(|e| e.value().as_string().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let ephemeral = entry_as_string(node, "ephemeral")
        .map(|v| match v.as_str() {
            "after-each-job" => Ok(EphemeralSetting::AfterEachJob),
            "after-idle-timeout" => Ok(EphemeralSetting::AfterIdleTimeout),
            other => Err(ConfigError::InvalidValue {
                field: format!("pool '{name}' ephemeral"),
                message: format!("unknown ephemeral policy '{other}'"),
            }),
        })
        .transpose()?;

    let idle_timeout_secs = entry_as_i64(node, "idle-timeout-secs").map(|v| v as u64);

    Ok(PoolConfig {
        name,
        provider,
        max_workers,
        labels,
        ephemeral,
        idle_timeout_secs,
    })
}

fn parse_scheduler(node: &KdlNode) -> SchedulerConfig {
    let strategy = entry_as_string(node, "strategy").unwrap_or_else(|| "least-loaded".to_string());
    let tick_interval = entry_as_i64(node, "tick-interval-secs")
        .map(|s| Duration::from_secs(s as u64))
        .unwrap_or(Duration::from_secs(1));
    let utilization_max_age = entry_as_i64(node, "utilization-max-age-secs")
        .map(|s| Duration::from_secs(s as u64))
        .unwrap_or(Duration::from_secs(15));

    let weights = node
        .iter_children()
        .find(|n| n.name().value() == "least-loaded-weights")
        .map(|n| LeastLoadedWeights {
            cpu: entry_as_f64(n, "cpu").unwrap_or(1.0 / 3.0),
            mem: entry_as_f64(n, "mem").unwrap_or(1.0 / 3.0),
            active_ratio: entry_as_f64(n, "active").unwrap_or(1.0 / 3.0),
        })
        .unwrap_or_default();

    SchedulerConfig {
        strategy,
        least_loaded_weights: weights,
        tick_interval,
        utilization_max_age,
    }
}

fn parse_heartbeat(node: &KdlNode) -> HeartbeatConfig {
    let interval = entry_as_i64(node, "interval-secs")
        .map(|s| Duration::from_secs(s as u64))
        .unwrap_or(Duration::from_secs(10));
    let missed_beats = entry_as_i64(node, "missed-beats").unwrap_or(3) as u32;
    HeartbeatConfig {
        interval,
        missed_beats,
    }
}

/// Parses orchestrator system configuration from KDL text, e.g.:
///
/// ```text
/// pool "poolA" {
///     provider "docker"
///     max-workers 5
///     labels "linux" "x86_64"
///     ephemeral "after-each-job"
/// }
/// scheduler {
///     strategy "least-loaded"
///     least-loaded-weights cpu=0.34 mem=0.33 active=0.33
/// }
/// heartbeat {
///     interval-secs 10
///     missed-beats 3
/// }
/// ```
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    let mut seen_names = std::collections::HashSet::new();
    for node in doc.nodes() {
        match node.name().value() {
            "pool" => {
                let pool = parse_pool(node)?;
                if !seen_names.insert(pool.name.clone()) {
                    return Err(ConfigError::Duplicate(format!("pool '{}'", pool.name)));
                }
                config.pools.push(pool);
            }
            "scheduler" => config.scheduler = parse_scheduler(node),
            "heartbeat" => config.heartbeat = parse_heartbeat(node),
            "utilization-poll-interval-secs" => {
                if let Some(v) = node.entries().first().and_then(|e| e.value().as_integer()) {
                    config.utilization_poll_interval = Duration::from_secs(v as u64);
                }
            }
            "default-max-wait-time-secs" => {
                if let Some(v) = node.entries().first().and_then(|e| e.value().as_integer()) {
                    config.default_max_wait_time = Duration::from_secs(v as u64);
                }
            }
            _ => {}
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_pool_declaration() {
        let kdl = r#"
            pool "poolA" {
                provider "docker"
                max-workers 5
                labels "linux" "x86_64"
            }
        "#;
        let cfg = parse_system_config(kdl).unwrap();
        assert_eq!(cfg.pools.len(), 1);
        assert_eq!(cfg.pools[0].name, "poolA");
        assert_eq!(cfg.pools[0].max_workers, 5);
        assert_eq!(cfg.pools[0].labels, vec!["linux", "x86_64"]);
    }

    #[test]
    fn parses_scheduler_and_heartbeat_blocks() {
        let kdl = r#"
            scheduler {
                strategy "bin-packing"
                tick-interval-secs 2
            }
            heartbeat {
                interval-secs 15
                missed-beats 4
            }
        "#;
        let cfg = parse_system_config(kdl).unwrap();
        assert_eq!(cfg.scheduler.strategy, "bin-packing");
        assert_eq!(cfg.scheduler.tick_interval, Duration::from_secs(2));
        assert_eq!(cfg.heartbeat.interval, Duration::from_secs(15));
        assert_eq!(cfg.heartbeat.missed_beats, 4);
    }

    #[test]
    fn parses_utilization_max_age() {
        let kdl = r#"
            scheduler {
                strategy "least-loaded"
                utilization-max-age-secs 30
            }
        "#;
        let cfg = parse_system_config(kdl).unwrap();
        assert_eq!(cfg.scheduler.utilization_max_age, Duration::from_secs(30));
    }

    #[test]
    fn rejects_duplicate_pool_names() {
        let kdl = r#"
            pool "poolA" { provider "docker"; max-workers 1 }
            pool "poolA" { provider "docker"; max-workers 2 }
        "#;
        assert!(parse_system_config(kdl).is_err());
    }

    #[test]
    fn rejects_pool_missing_provider() {
        let kdl = r#"pool "poolA" { max-workers 1 }"#;
        assert!(parse_system_config(kdl).is_err());
    }

    #[test]
    fn defaults_when_sections_absent() {
        let cfg = parse_system_config("").unwrap();
        assert_eq!(cfg.scheduler.strategy, "least-loaded");
        assert_eq!(cfg.heartbeat.missed_beats, 3);
    }
}
