//! Orchestrator (C7): wires the Shared Persistent Store, Politeness
//! Engine, Frontier, and a pool of Workers together, drives seeding, and
//! coordinates graceful shutdown. Grounded on the teacher's `run_crawl`
//! spawn/shutdown-broadcast pattern, generalized from per-network drivers
//! to a single shard-per-worker pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};
use waypoint_core::config::AppConfig;
use waypoint_core::FetchConfig;
use waypoint_fetch::ReqwestFetcher;
use waypoint_frontier::Frontier;
use waypoint_parse::{FilesystemContentWriter, ScraperHtmlParser};
use waypoint_politeness::PolitenessEngine;
use waypoint_store::{RedisStore, Store};
use waypoint_worker::Worker;

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);
const CONTENT_DIR: &str = "content";

async fn build_frontier(config: &AppConfig) -> Result<Arc<Frontier>> {
    if config.frontier.shard_count_source != "worker_count" {
        bail!(
            "unsupported frontier.shard_count_source {:?}, only \"worker_count\" is implemented",
            config.frontier.shard_count_source
        );
    }
    if config.general.frontier_type != "pure_store" {
        bail!(
            "unsupported general.frontier_type {:?}, only \"pure_store\" is implemented (§9: the hybrid frontier is not reproduced in this core)",
            config.general.frontier_type
        );
    }

    let store: Arc<dyn Store> = Arc::new(
        RedisStore::connect(&config.store.redis_url)
            .await
            .context("connecting to the shared store")?,
    );
    let fetcher: Arc<dyn waypoint_core::HttpFetcher> =
        Arc::new(ReqwestFetcher::new().context("building the robots.txt fetcher")?);

    let politeness = Arc::new(PolitenessEngine::new(
        Arc::clone(&store),
        fetcher,
        config.general.user_agent.clone(),
        config.politeness.min_crawl_delay_seconds,
        config.politeness.robots_fetch_timeout_seconds,
        config.politeness.robots_default_ttl_seconds,
        config.politeness.robots_error_ttl_seconds,
        config.politeness.exclude_domains.clone(),
    ));

    Ok(Arc::new(Frontier::new(
        store,
        politeness,
        config.general.worker_count,
        config.general.max_url_length,
        config.store.seen_filter_capacity,
        config.store.seen_filter_fpr,
    )))
}

pub async fn run_crawl(
    mut config: AppConfig,
    seeds: Vec<String>,
    depth: Option<u32>,
    resume: bool,
) -> Result<()> {
    if let Some(depth) = depth {
        config.general.max_depth = depth;
    }
    let resume = resume || config.general.resume;

    let frontier = build_frontier(&config).await?;
    frontier
        .initialize(resume, &seeds, &config.normalize.strip_query_params)
        .await
        .context("initializing the frontier")?;

    let fetch_config = FetchConfig {
        timeout: Duration::from_secs(config.general.http_timeout_seconds),
        user_agent: config.general.user_agent.clone(),
        ..FetchConfig::default()
    };

    let fetcher: Arc<dyn waypoint_core::HttpFetcher> =
        Arc::new(ReqwestFetcher::new().context("building the page fetcher")?);
    let parser: Arc<dyn waypoint_core::HtmlParser> = Arc::new(ScraperHtmlParser::new());
    let writer: Arc<dyn waypoint_core::ContentWriter> =
        Arc::new(FilesystemContentWriter::new(CONTENT_DIR));

    let store_op_timeout = Duration::from_secs(config.general.store_op_timeout_seconds);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut workers = JoinSet::new();
    for shard_id in 0..config.general.worker_count {
        let worker = Worker::new(
            shard_id,
            shard_id,
            Arc::clone(&frontier),
            Arc::clone(&fetcher),
            Arc::clone(&parser),
            Arc::clone(&writer),
            fetch_config.clone(),
            config.general.max_depth,
            config.normalize.strip_query_params.clone(),
            store_op_timeout,
        );
        let shutdown_rx = shutdown_tx.subscribe();
        workers.spawn(async move { worker.run(shutdown_rx).await });
    }

    info!(workers = workers.len(), "crawl started, press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested, notifying workers");
    let _ = shutdown_tx.send(());

    let drain = async {
        while workers.join_next().await.is_some() {}
    };
    if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, drain).await.is_err() {
        warn!(outstanding = workers.len(), "grace period elapsed, aborting remaining workers");
        workers.shutdown().await;
    }

    info!("crawl stopped");
    Ok(())
}

pub async fn run_status(config: AppConfig) -> Result<()> {
    let frontier = build_frontier(&config).await?;
    let count = frontier.count().await.context("reading frontier count")?;
    let depths = frontier
        .shard_queue_depths()
        .await
        .context("reading per-shard queue depths")?;
    let domains_seen = frontier
        .domains_seen_count()
        .await
        .context("reading domains-seen count")?;
    println!("pending urls: {count}");
    println!("domains seen: {domains_seen}");
    println!("workers configured: {}", config.general.worker_count);
    println!("max depth: {}", config.general.max_depth);
    for (shard, depth) in depths.iter().enumerate() {
        println!("  shard {shard}: {depth} domains queued");
    }
    Ok(())
}
