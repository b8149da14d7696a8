//! Default configuration template with every option documented.

/// Commented TOML template matching [`LaneworkConfig::default`](crate::LaneworkConfig).
#[must_use]
pub fn default_config_template() -> String {
    r##"# Lanework Configuration
# ======================
# Every option is listed with its default value.
# Environment variable substitution is supported: ${ENV_VAR} or ${ENV_VAR:-fallback}
# LANEWORK_MAXIMUM_PARALLEL overrides engine.maximum_parallel.

# ══════════════════════════════════════════════════════════════════════════════
# ENGINE
# ══════════════════════════════════════════════════════════════════════════════

[engine]
maximum_parallel = 4                  # Lanes, i.e. owners processed at the same time (>= 1)
waiting_list_idle_timeout_secs = 30   # Idle seconds before the overflow drainer shuts down
read_timeout_ms = 30000               # Default timeout for pull reads ("wait for next item")

# ══════════════════════════════════════════════════════════════════════════════
# TELEMETRY
# ══════════════════════════════════════════════════════════════════════════════

[telemetry]
log_level = "info"                    # Used when RUST_LOG is not set
json_logs = false                     # JSON lines instead of human-readable output

# ══════════════════════════════════════════════════════════════════════════════
# METRICS
# ══════════════════════════════════════════════════════════════════════════════

[metrics]
enabled = false                       # Install the Prometheus recorder (needs the prometheus feature)

# [metrics.labels]                    # Labels added to every metric
# instance = "worker-1"

# ══════════════════════════════════════════════════════════════════════════════
# SIMULATE
# ══════════════════════════════════════════════════════════════════════════════
# Synthetic workload for `lanework simulate`.

[simulate]
owners = 8                            # Distinct owners
items_per_owner = 16                  # Items enqueued per owner
work_ms = 5                           # Simulated work per item
"##
    .to_string()
}
