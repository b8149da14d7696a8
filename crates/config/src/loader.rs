use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::LaneworkConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "lanework.toml",
    "lanework.yaml",
    "lanework.yml",
    "lanework.json",
];

/// Environment variable that overrides `engine.maximum_parallel`.
pub const MAXIMUM_PARALLEL_ENV: &str = "LANEWORK_MAXIMUM_PARALLEL";

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<LaneworkConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./lanework.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/lanework/lanework.{toml,yaml,yml,json}` (user-global)
///
/// Returns `LaneworkConfig::default()` if no config file is found or the one
/// found fails to load.
pub fn discover_and_load() -> LaneworkConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    LaneworkConfig::default()
}

/// Find the first config file in standard locations.
pub(crate) fn find_config_file() -> Option<PathBuf> {
    if let Some(path) = find_in_dir(Path::new(".")) {
        return Some(path);
    }
    config_dir().and_then(|dir| find_in_dir(&dir))
}

fn find_in_dir(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/lanework/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "lanework").map(|d| d.config_dir().to_path_buf())
}

/// Applies `LANEWORK_*` environment overrides on top of a loaded config.
pub fn apply_env_overrides(config: &mut LaneworkConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut LaneworkConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(raw) = lookup(MAXIMUM_PARALLEL_ENV) {
        match raw.trim().parse::<usize>() {
            Ok(value) => {
                debug!(value, "maximum_parallel overridden from environment");
                config.engine.maximum_parallel = value;
            },
            Err(e) => warn!(
                var = MAXIMUM_PARALLEL_ENV,
                value = %raw,
                error = %e,
                "ignoring invalid environment override"
            ),
        }
    }
}

/// Parse a config document whose format is picked by `path`'s extension.
pub fn parse_config(raw: &str, path: &Path) -> anyhow::Result<LaneworkConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

/// Parse into a TOML value tree regardless of source format, for validation.
pub(crate) fn parse_config_value(raw: &str, path: &Path) -> anyhow::Result<toml::Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(toml::Value::try_from(v)?)
        },
        "json" => {
            let v: serde_json::Value = serde_json::from_str(raw)?;
            Ok(toml::Value::try_from(v)?)
        },
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
