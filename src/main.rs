use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ratekeeper::config::{LogFormat, LoggingConfig, RatekeeperConfig, StoreKind};
use ratekeeper::grpc::GrpcServer;
use ratekeeper::ratelimit::{ActorStore, LimitTable, MemoryStore, RateStore, RateTracker};

/// Sliding-window rate limiting service.
#[derive(Parser, Debug)]
#[command(name = "ratekeeper", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a YAML rules file (overrides the configuration)
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Address for the gRPC server (overrides the configuration)
    #[arg(long)]
    grpc_addr: Option<SocketAddr>,

    /// Log output format (overrides the configuration)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Run the gRPC service (default)
    Serve,
    /// Print the effective limit table as JSON and exit
    Rules,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = RatekeeperConfig::load(cli.config.as_deref())?;
    if let Some(rules) = cli.rules {
        config.rate_limiting.rules_path = Some(rules.display().to_string());
    }
    if let Some(addr) = cli.grpc_addr {
        config.server.grpc_addr = addr;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    init_tracing(&config.logging);

    let table = match &config.rate_limiting.rules_path {
        Some(path) => LimitTable::from_file(path)?,
        None => LimitTable::builtin(),
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Rules => {
            println!("{}", serde_json::to_string_pretty(&table)?);
            Ok(())
        }
        Command::Serve => {
            info!("Starting Ratekeeper Rate Limiting Service");
            info!("Version: {}", env!("CARGO_PKG_VERSION"));

            match config.rate_limiting.store {
                StoreKind::Memory => {
                    serve(&config, RateTracker::with_store(table, MemoryStore::new())).await
                }
                StoreKind::Actor => {
                    serve(&config, RateTracker::with_store(table, ActorStore::spawn())).await
                }
            }
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn serve<S: RateStore + 'static>(
    config: &RatekeeperConfig,
    tracker: RateTracker<S>,
) -> anyhow::Result<()> {
    let tracker = Arc::new(tracker.with_settings(config.rate_limiting.tracker_settings()));
    info!(
        store = ?config.rate_limiting.store,
        operations = tracker.table().operations.len(),
        "Rate tracker ready"
    );

    let sweeper = config
        .rate_limiting
        .sweep_interval()
        .map(|period| spawn_sweeper(tracker.clone(), period));

    let grpc_server = GrpcServer::new(config.server.grpc_addr, tracker);
    info!("Starting gRPC server on {}", config.server.grpc_addr);

    // Run the server with graceful shutdown on Ctrl+C
    grpc_server.serve_with_shutdown(shutdown_signal()).await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("Ratekeeper Rate Limiting Service stopped");
    Ok(())
}

/// Periodically drop stale keys so idle callers do not pin memory.
fn spawn_sweeper<S: RateStore + 'static>(
    tracker: Arc<RateTracker<S>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = tracker.sweep().await {
                warn!(error = %e, "Background sweep failed");
            }
        }
    })
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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
