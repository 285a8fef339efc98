//! Ember Server Daemon
//!
//! The `emberd` binary hosts one Ember engine in-process:
//! - Opens the database with the configured memory region and rule dispatch
//! - Runs periodic reclamation of superseded versions
//! - Handles graceful shutdown on SIGTERM/SIGINT
//!
//! # Usage
//!
//! ```bash
//! # Start with default settings
//! emberd
//!
//! # Acknowledge that nothing is persisted
//! emberd --disable-persistence
//!
//! # Use a configuration file
//! EMBER_CONFIG=/etc/ember/emberd.toml emberd
//! ```
//!
//! Any other invocation is a startup error.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use ember_server::config::ServerConfig;
use ember_server::database::Database;

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "EMBER_CONFIG";

/// Ember Server Daemon
#[derive(Parser, Debug)]
#[command(
    name = "emberd",
    about = "Ember in-memory transactional engine",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Args {
    /// Run without durable persistence
    #[arg(long)]
    disable_persistence: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::try_parse().context("emberd accepts only --disable-persistence")?;

    let config = load_config(&args)?;
    init_logging(&config);

    run_server(config).await
}

fn init_logging(config: &ServerConfig) {
    let level = &config.log_level;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "ember_server={level},ember_rules={level},ember_txn={level},\
                 ember_catalog={level},ember_memory={level},ember_common={level}"
            ))
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            ServerConfig::from_file(&path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?
        }
        None => ServerConfig::default(),
    };

    if args.disable_persistence {
        config.disable_persistence = true;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run_server(config: ServerConfig) -> Result<()> {
    if config.disable_persistence {
        info!("Persistence disabled, running in memory only");
    } else {
        warn!("Durable persistence is unavailable, running in memory only");
    }

    let db = Database::open(config.engine.clone()).context("Failed to open database")?;

    info!("Server configuration:");
    info!("  Region size: {} bytes", config.engine.memory.region_size);
    info!("  Max locators: {}", config.engine.memory.max_locators);
    info!("  Rule dispatch: {:?}", config.engine.rules.dispatch);
    info!("  Event log: {}", config.engine.rules.log_events);
    info!("  Reclaim interval: {:?}", config.reclaim_interval());
    info!("Press Ctrl+C to shutdown");

    let mut ticker = interval(config.reclaim_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match db.reclaim() {
                    Ok(result) if result.did_work() => debug!(?result, "reclaim pass"),
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => {
                        error!("Fatal reclamation error: {}", e);
                        db.shutdown();
                        return Err(anyhow::anyhow!("Fatal reclamation error: {}", e));
                    }
                    Err(e) => warn!("Reclamation failed: {}", e),
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down gracefully...");
    let stats = db.stats();
    if stats.active_transactions > 0 {
        warn!("Abandoning {} active transactions", stats.active_transactions);
    }
    db.shutdown();

    info!("Server stopped. Goodbye!");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
