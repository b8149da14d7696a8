//! Config schema. Every section defaults, so an empty file is a valid config.

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneworkConfig {
    pub engine: EngineConfig,
    pub telemetry: TelemetryConfig,
    pub metrics: MetricsConfig,
    pub simulate: SimulateConfig,
}

/// Lane engine sizing and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of lanes, i.e. owners processed concurrently.
    pub maximum_parallel: usize,
    /// Seconds the waiting-list drainer lingers without new items.
    pub waiting_list_idle_timeout_secs: u64,
    /// Default timeout for pull reads, in milliseconds.
    pub read_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            maximum_parallel: 4,
            waiting_list_idle_timeout_secs: 30,
            read_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn waiting_list_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.waiting_list_idle_timeout_secs)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            json_logs: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Labels attached to every exported metric.
    pub labels: BTreeMap<String, String>,
}

/// Workload generated by `lanework simulate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulateConfig {
    pub owners: usize,
    pub items_per_owner: usize,
    /// Simulated work per item, in milliseconds.
    pub work_ms: u64,
}

impl Default for SimulateConfig {
    fn default() -> Self {
        Self {
            owners: 8,
            items_per_owner: 16,
            work_ms: 5,
        }
    }
}
