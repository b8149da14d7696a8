mod config_commands;
mod simulate_commands;

use std::path::{Path, PathBuf};

use {
    clap::{Parser, Subcommand},
    lanework_config::{LaneworkConfig, TelemetryConfig},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {config_commands::ConfigAction, simulate_commands::Workload};

#[derive(Parser)]
#[command(name = "lanework", about = "lanework: owner-partitioned work lanes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to `telemetry.log_level`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of the discovered one.
    #[arg(long, global = true, env = "LANEWORK_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic workload through an engine and print a JSON summary.
    Simulate {
        /// Number of distinct owners.
        #[arg(long)]
        owners: Option<usize>,
        /// Items enqueued per owner.
        #[arg(long)]
        items: Option<usize>,
        /// Lane count (overrides `engine.maximum_parallel`).
        #[arg(long)]
        parallel: Option<usize>,
        /// Simulated work per item, in milliseconds.
        #[arg(long)]
        work_ms: Option<u64>,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

fn init_telemetry(cli: &Cli, telemetry: &TelemetryConfig) {
    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(telemetry.log_level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr.
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs || telemetry.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<LaneworkConfig> {
    let mut config = match path {
        Some(path) => lanework_config::load_config(path)?,
        None => lanework_config::discover_and_load(),
    };
    lanework_config::apply_env_overrides(&mut config);
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `config check` must report a broken file rather than fail to start.
    let config = match &cli.command {
        Commands::Config { .. } => load_config(cli.config.as_deref()).unwrap_or_default(),
        Commands::Simulate { .. } => load_config(cli.config.as_deref())?,
    };
    init_telemetry(&cli, &config.telemetry);

    info!(version = env!("CARGO_PKG_VERSION"), "lanework starting");

    match cli.command {
        Commands::Simulate {
            owners,
            items,
            parallel,
            work_ms,
        } => {
            let workload = Workload::from_config(&config)
                .with_overrides(owners, items, parallel, work_ms);
            simulate_commands::handle_simulate(workload, &config).await
        },
        Commands::Config { action } => config_commands::handle_config(action, cli.config),
    }
}
