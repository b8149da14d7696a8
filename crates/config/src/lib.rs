//! Configuration loading, validation and env substitution for lanework.
//!
//! Config files: `lanework.toml`, `lanework.yaml`, or `lanework.json`
//! Searched in `./` then `~/.config/lanework/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod template;
pub mod validate;

pub use {
    loader::{
        MAXIMUM_PARALLEL_ENV, apply_env_overrides, config_dir, discover_and_load, load_config,
        parse_config,
    },
    schema::{EngineConfig, LaneworkConfig, MetricsConfig, SimulateConfig, TelemetryConfig},
    template::default_config_template,
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_toml_str},
};
