//! # Covergen Server
//!
//! Runs the cover pipeline next to a small HTTP surface:
//!
//! - `GET /covers/{videoId}` serves a stored cover or queues one
//! - `GET /health` reports queue depth and worker totals
//!
//! Subcommands cover one-off operations (a single backfill pass, manual
//! enqueues, configuration checks) against the same configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use covergen_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use covergen_core::{CoverEnqueuer, LockManager, VideoId, WorkQueue};
use covergen_server::{AppState, create_router, infra::startup};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "covergen-server")]
#[command(about = "Cover-image generation pipeline with an HTTP cover endpoint")]
struct Cli {
    /// Path to covergen.toml
    #[arg(long, global = true, env = "COVERGEN_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Path to a .env file to load before reading the environment
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server, worker pool and backfill scheduler (default)
    Serve {
        /// Server port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Server host (overrides config)
        #[arg(long)]
        host: Option<String>,
    },
    /// Run one guarded backfill pass and exit
    Backfill,
    /// Queue covers for specific videos and exit
    Enqueue {
        #[arg(required = true)]
        video_ids: Vec<String>,
    },
    /// Load the configuration, print warnings and the lock budget, and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let command = cli.command.unwrap_or(Command::Serve {
        port: None,
        host: None,
    });
    let read_only = matches!(command, Command::CheckConfig);
    let ConfigLoad { config, warnings } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: cli.config,
        env_file: cli.env_file,
        skip_directories: read_only,
    })
    .load()
    .context("failed to load configuration")?;

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "loaded configuration file");
    }
    warnings.log();

    match command {
        Command::Serve { port, host } => run_server(config, port, host).await,
        Command::Backfill => run_backfill(config).await,
        Command::Enqueue { video_ids } => run_enqueue(config, video_ids).await,
        Command::CheckConfig => check_config(&config),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,covergen_core=info,covergen_server=info,tower_http=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_server(
    mut config: Config,
    port: Option<u16>,
    host: Option<String>,
) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }

    let pipeline = startup::build_pipeline(&config).await?;
    pipeline.start().await;

    let app = create_router(AppState::new(pipeline.clone()));
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server host or port")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Cover server listening on http://{}", addr);

    let shutdown = pipeline.shutdown_token();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = shutdown.cancelled() => {}
            }
        })
        .await;

    pipeline.shutdown().await;
    served.context("HTTP server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn run_backfill(config: Config) -> anyhow::Result<()> {
    let pipeline = startup::build_pipeline(&config).await?;
    let report = pipeline
        .backfill()
        .run_once()
        .await
        .context("backfill pass failed")?;
    if report.skipped {
        info!("Backfill skipped; another process ran it within the current interval");
    } else {
        info!(found = report.found, queued = report.queued, "Backfill pass finished");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_enqueue(config: Config, raw_ids: Vec<String>) -> anyhow::Result<()> {
    let video_ids = raw_ids
        .iter()
        .map(|raw| VideoId::parse(raw).with_context(|| format!("invalid video id '{raw}'")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let store = startup::connect_store(&config).await?;
    let keys = config.pipeline.keys();
    let locks = LockManager::new(store.clone(), keys.clone(), config.pipeline.lock.ttl());
    let enqueuer = CoverEnqueuer::new(locks, WorkQueue::new(store, &keys));

    for video_id in &video_ids {
        let status = if enqueuer.enqueue(video_id).await {
            "queued"
        } else {
            "pending"
        };
        println!("{video_id}\t{status}");
    }
    Ok(())
}

fn check_config(config: &Config) -> anyhow::Result<()> {
    let budget = config.pipeline.check_lock_budget()?;
    let store = if config.redis.is_some() { "redis" } else { "in-memory" };
    println!("coordination store: {store}");
    println!("cover directory:    {}", config.cover_dir().display());
    println!("workers:            {}", config.pipeline.worker.concurrency);
    println!("max retries:        {}", config.pipeline.retry.max_retries);
    println!("worst-case job:     {}s", budget.job_time.as_secs());
    println!("lock refresh:       {}s", budget.refresh_interval.as_secs());
    println!("lock TTL:           {}s", budget.lock_ttl.as_secs());
    if let Some(headroom) = budget.headroom() {
        println!("headroom:           {}s", headroom.as_secs());
    }
    Ok(())
}
