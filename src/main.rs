//! calendar-sync - booking-platform calendar synchronization engine
//!
//! This is the main entry point for the calendar-sync binary.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use calendar_sync::clock::{Clock, SystemClock};
use calendar_sync::config::Config;
use calendar_sync::database::SqliteDatabase;
use calendar_sync::otel::{init_tracing, Metrics, OtelProvider};
use calendar_sync::plugins::platform::{HttpPageFetcher, RequestPacer, ScraperRegistry};
use calendar_sync::session::SessionPool;
use calendar_sync::sync::SyncOrchestrator;

/// calendar-sync - keeps host availability in step with booking platforms
#[derive(Parser, Debug)]
#[command(name = "calendar-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "CALENDAR_SYNC_CONFIG", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the periodic sync loop until Ctrl+C or SIGTERM (default)
    Run,

    /// Sync now, ignoring frequency
    SyncNow {
        /// Only this property (also ignores its flag)
        #[arg(long)]
        property: Option<i64>,
    },

    /// Show recent sync logs
    Logs {
        /// Only this property
        #[arg(long)]
        property: Option<i64>,

        /// Maximum number of rows
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// List flagged properties, or clear one
    Flags {
        /// Property whose flag to clear
        #[arg(long)]
        clear: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let otel_provider = OtelProvider::new(&config.otel)?;
    init_tracing(&otel_provider, &config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting calendar-sync"
    );

    let database = Arc::new(SqliteDatabase::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pool = Arc::new(SessionPool::new(
        config.proxy.clone(),
        &config.stealth,
        config.scraping.max_concurrency,
        clock.clone(),
    ));
    info!(identities = pool.len(), "Session pool initialized");

    let fetcher = Arc::new(HttpPageFetcher::new(Duration::from_millis(
        config.scraping.retry.attempt_timeout_ms,
    )));
    let pacer = Arc::new(RequestPacer::new(
        &config.scraping.request_delay,
        clock.clone(),
    ));
    let scrapers = ScraperRegistry::standard(fetcher, pacer, clock.clone(), &config.platforms);
    let metrics = Arc::new(Metrics::new(&otel_provider.meter()));

    let orchestrator = SyncOrchestrator::new(
        database,
        pool,
        scrapers,
        clock,
        &config,
        Some(metrics),
    );

    let result = execute(args.command.unwrap_or(Command::Run), &orchestrator).await;

    if let Err(e) = otel_provider.shutdown() {
        error!(error = %e, "Failed to shutdown OpenTelemetry");
    }
    info!("calendar-sync shutdown complete");

    result
}

async fn execute(command: Command, orchestrator: &SyncOrchestrator) -> anyhow::Result<()> {
    match command {
        Command::Run => {
            let recovered = orchestrator.recover_interrupted().await?;
            if recovered > 0 {
                info!(recovered, "Cancelled sync logs from an interrupted run");
            }
            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = shutdown_tx.send(());
            });
            orchestrator.run(shutdown_rx).await;
        }
        Command::SyncNow {
            property: Some(id),
        } => {
            let log = drain_on_signal(orchestrator, orchestrator.sync_property_now(id)).await?;
            println!("{}", serde_json::to_string_pretty(&log)?);
        }
        Command::SyncNow { property: None } => {
            let report = drain_on_signal(orchestrator, orchestrator.sync_all_now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Logs { property, limit } => {
            for log in orchestrator.history(property, limit, 0).await? {
                println!("{}", serde_json::to_string(&log)?);
            }
        }
        Command::Flags { clear: Some(id) } => {
            if !orchestrator.clear_flag(id).await? {
                anyhow::bail!("property {} has no open flag", id);
            }
            println!("cleared flag for property {}", id);
        }
        Command::Flags { clear: None } => {
            for flag in orchestrator.flagged_properties().await? {
                println!("{}", serde_json::to_string(&flag)?);
            }
        }
    }
    Ok(())
}

/// Await a run-now job; on Ctrl+C or SIGTERM stop admitting work and let
/// the job settle so no log is left open
async fn drain_on_signal<F: Future>(orchestrator: &SyncOrchestrator, job: F) -> F::Output {
    tokio::pin!(job);
    tokio::select! {
        output = &mut job => output,
        _ = shutdown_signal() => {
            orchestrator.shutdown();
            info!("Waiting for running sync jobs to finish");
            job.await
        }
    }
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let config = match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path)
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env()
        }
    }
    .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;
    Ok(config)
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
