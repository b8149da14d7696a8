//! Configuration validation.
//!
//! Checks a config file against the known schema: syntax, unknown or
//! misspelled fields, type errors, and values that parse but make no sense
//! for the engine.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::{loader::parse_config_value, schema::LaneworkConfig};

/// Lane counts above this are almost certainly a typo.
const MAXIMUM_PARALLEL_SANITY_LIMIT: usize = 1024;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "engine", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "engine.maximum_paralel"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}]: {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    /// A struct with fixed field names.
    Struct(HashMap<&'static str, KnownKeys>),
    /// A map with free-form keys (e.g. `metrics.labels`).
    Map,
    /// Scalar value, stop recursion.
    Leaf,
}

/// Mirrors every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Map, Struct};

    Struct(HashMap::from([
        (
            "engine",
            Struct(HashMap::from([
                ("maximum_parallel", Leaf),
                ("waiting_list_idle_timeout_secs", Leaf),
                ("read_timeout_ms", Leaf),
            ])),
        ),
        (
            "telemetry",
            Struct(HashMap::from([("log_level", Leaf), ("json_logs", Leaf)])),
        ),
        (
            "metrics",
            Struct(HashMap::from([("enabled", Leaf), ("labels", Map)])),
        ),
        (
            "simulate",
            Struct(HashMap::from([
                ("owners", Leaf),
                ("items_per_owner", Leaf),
                ("work_ms", Leaf),
            ])),
        ),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|candidate| (*candidate, levenshtein(needle, candidate)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(candidate, d)| (*d, *candidate))
        .map(|(candidate, _)| candidate)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered config file
/// when `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let content = match std::fs::read_to_string(&actual_path) {
        Ok(content) => crate::env_subst::substitute_env(&content),
        Err(e) => {
            return ValidationResult {
                diagnostics: vec![Diagnostic::new(
                    Severity::Error,
                    "file-ref",
                    "",
                    format!("failed to read config file: {e}"),
                )],
                config_path: Some(actual_path),
            };
        },
    };

    let mut result = match parse_config_value(&content, &actual_path) {
        Ok(value) => validate_value(value),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("syntax error: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate a TOML string without touching the file system.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    match toml::from_str::<toml::Value>(toml_str) {
        Ok(value) => validate_value(value),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("TOML syntax error: {e}"),
            )],
            config_path: None,
        },
    }
}

fn validate_value(value: toml::Value) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let schema = build_schema_map();
    check_unknown_fields(&value, &schema, "", &mut diagnostics);

    match value.try_into::<LaneworkConfig>() {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Walk the value tree against the schema tree and flag unknown keys.
fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (toml::Value::Table(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known_keys: Vec<&str> = fields.keys().copied().collect();
    for (key, child_value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if let Some(child_schema) = fields.get(key.as_str()) {
            check_unknown_fields(child_value, child_schema, &path, diagnostics);
            continue;
        }
        let level = if prefix.is_empty() {
            " at top level"
        } else {
            ""
        };
        let message = match suggest(key, &known_keys, 3) {
            Some(s) => format!("unknown field{level} (did you mean \"{s}\"?)"),
            None => format!("unknown field{level}"),
        };
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "unknown-field",
            path,
            message,
        ));
    }
}

fn check_semantics(config: &LaneworkConfig, diagnostics: &mut Vec<Diagnostic>) {
    let engine = &config.engine;
    if engine.maximum_parallel == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "engine",
            "engine.maximum_parallel",
            "must be at least 1; the engine refuses to start with no lanes",
        ));
    } else if engine.maximum_parallel > MAXIMUM_PARALLEL_SANITY_LIMIT {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "engine",
            "engine.maximum_parallel",
            format!(
                "{} lanes is unusually high (above {MAXIMUM_PARALLEL_SANITY_LIMIT})",
                engine.maximum_parallel
            ),
        ));
    }

    if engine.waiting_list_idle_timeout_secs == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "engine",
            "engine.waiting_list_idle_timeout_secs",
            "0 tears the waiting-list drainer down after every item",
        ));
    }

    if engine.read_timeout_ms == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "engine",
            "engine.read_timeout_ms",
            "0 makes every pull read time out immediately",
        ));
    }

    if config.simulate.owners == 0 || config.simulate.items_per_owner == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Info,
            "simulate",
            "simulate",
            "simulation generates no items",
        ));
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, std::io::Write};

    fn find<'a>(result: &'a ValidationResult, category: &str, path: &str) -> Option<&'a Diagnostic> {
        result
            .diagnostics
            .iter()
            .find(|d| d.category == category && d.path == path)
    }

    #[test]
    fn empty_config_is_valid() {
        let result = validate_toml_str("");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn syntax_error_reported() {
        let result = validate_toml_str("[engine\nmaximum_parallel = 1");
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[rstest]
    #[case("[engine]\nmaximum_paralel = 2\n", "engine.maximum_paralel", Some("maximum_parallel"))]
    #[case("[engnie]\n", "engnie", Some("engine"))]
    #[case("[telemetry]\njson_log = true\n", "telemetry.json_log", Some("json_logs"))]
    #[case("[engine]\ncompletely_unrelated = 1\n", "engine.completely_unrelated", None)]
    fn unknown_fields(#[case] toml: &str, #[case] path: &str, #[case] hint: Option<&str>) {
        let result = validate_toml_str(toml);
        let diagnostic = find(&result, "unknown-field", path)
            .unwrap_or_else(|| panic!("no unknown-field for {path}: {:?}", result.diagnostics));
        assert_eq!(diagnostic.severity, Severity::Error);
        match hint {
            Some(hint) => assert!(diagnostic.message.contains(hint), "{}", diagnostic.message),
            None => assert!(!diagnostic.message.contains("did you mean")),
        }
    }

    #[test]
    fn metric_labels_accept_any_key() {
        let result = validate_toml_str("[metrics.labels]\nregion = \"eu\"\nwhatever = \"x\"\n");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn wrong_type_is_type_error() {
        let result = validate_toml_str("[engine]\nmaximum_parallel = \"four\"\n");
        let diagnostic = result
            .diagnostics
            .iter()
            .find(|d| d.category == "type-error")
            .unwrap();
        assert_eq!(diagnostic.severity, Severity::Error);
    }

    #[rstest]
    #[case("[engine]\nmaximum_parallel = 0\n", "engine.maximum_parallel", Severity::Error)]
    #[case("[engine]\nmaximum_parallel = 5000\n", "engine.maximum_parallel", Severity::Warning)]
    #[case(
        "[engine]\nwaiting_list_idle_timeout_secs = 0\n",
        "engine.waiting_list_idle_timeout_secs",
        Severity::Warning
    )]
    #[case("[engine]\nread_timeout_ms = 0\n", "engine.read_timeout_ms", Severity::Warning)]
    fn engine_semantics(#[case] toml: &str, #[case] path: &str, #[case] severity: Severity) {
        let result = validate_toml_str(toml);
        let diagnostic = find(&result, "engine", path).unwrap();
        assert_eq!(diagnostic.severity, severity);
    }

    #[test]
    fn suggest_prefers_closest() {
        assert_eq!(suggest("ownres", &["owners", "work_ms"], 3), Some("owners"));
        assert_eq!(suggest("owners", &["owners"], 3), None);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
    }

    #[test]
    fn validates_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lanework.json");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(br#"{"engine": {"maximum_parallel": 0, "lanes": 2}}"#)
            .unwrap();

        let result = validate(Some(path.as_path()));
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
        assert!(find(&result, "engine", "engine.maximum_parallel").is_some());
        assert!(find(&result, "unknown-field", "engine.lanes").is_some());
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let result = validate(Some(Path::new("/nonexistent/lanework.toml")));
        assert!(result.has_errors());
        assert_eq!(result.count(Severity::Error), 1);
    }

    #[test]
    fn diagnostic_display() {
        let d = Diagnostic::new(Severity::Warning, "engine", "engine.read_timeout_ms", "zero");
        assert_eq!(d.to_string(), "warning [engine] engine.read_timeout_ms: zero");
    }
}
