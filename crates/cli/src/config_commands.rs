use std::path::PathBuf;

use {anyhow::Result, clap::Subcommand};

use lanework_config::{Severity, ValidationResult, default_config_template, validate};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate a configuration file and report errors/warnings.
    Check {
        /// File to check. Defaults to `--config`, then the discovered file.
        path: Option<PathBuf>,
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print a commented default configuration.
    Template,
}

pub fn handle_config(action: ConfigAction, config_path: Option<PathBuf>) -> Result<()> {
    match action {
        ConfigAction::Check { path, verbose } => {
            let result = validate(path.or(config_path).as_deref());
            if !check(&result, verbose) {
                std::process::exit(1);
            }
            Ok(())
        },
        ConfigAction::Template => {
            print!("{}", default_config_template());
            Ok(())
        },
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Prints the diagnostics; returns `false` when any of them is an error.
fn check(result: &ValidationResult, verbose: bool) -> bool {
    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let mut shown = 0;
    for line in render(result, verbose) {
        eprintln!("  {line}");
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    errors == 0
}

fn render(result: &ValidationResult, verbose: bool) -> Vec<String> {
    result
        .diagnostics
        .iter()
        .filter(|d| verbose || d.severity != Severity::Info)
        .map(|d| {
            let color = match d.severity {
                Severity::Error => RED,
                Severity::Warning => YELLOW,
                Severity::Info => CYAN,
            };
            if d.path.is_empty() {
                format!("{BOLD}{color}{}{RESET} {}", d.severity, d.message)
            } else {
                format!("{BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message)
            }
        })
        .collect()
}
