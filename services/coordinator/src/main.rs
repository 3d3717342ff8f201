//! Coordinator binary.
//!
//! Parses the command line, loads configuration from the environment and
//! hands off to the library. The runtime is built by hand so the worker
//! count can come from configuration.

use anyhow::Result;
use clap::Parser;
use coordinator::cli::{self, Cli};
use coordinator::config::CoordinatorConfig;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = CoordinatorConfig::from_env()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = config.worker_threads,
        "coordinator starting"
    );
    runtime.block_on(cli::dispatch(cli.command, config))?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "coordinator=info,chain_gateway=info,fixture_store=info,\
                 results_collector=info,match_selector=info,projector=info,sqlx=warn",
            )
        }))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
