mod cli;
mod orchestrator;
mod seeds;

use anyhow::Result;
use clap::Parser;
use tracing::warn;
use waypoint_core::config::AppConfig;

// mimalloc avoids glibc malloc's fragmentation under the worker pool's
// high list-churn allocation pattern.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use crate::cli::{Cli, Commands};

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using built-in defaults");
        include_str!("../config/default.toml").to_string()
    });
    let config: AppConfig = toml::from_str(&config_str)?;

    match cli.command {
        Commands::Crawl {
            seeds: seed_file,
            seed,
            depth,
            resume,
        } => {
            let mut all_seeds = seed;
            if let Some(path) = seed_file {
                all_seeds.extend(seeds::load_seed_file(&path)?);
            }
            orchestrator::run_crawl(config, all_seeds, depth, resume).await?;
        }
        Commands::Status => {
            orchestrator::run_status(config).await?;
        }
    }

    Ok(())
}
