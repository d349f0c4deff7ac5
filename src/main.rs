use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use quotad::clock::SystemClock;
use quotad::config::{LogFormat, QuotadConfig, StoreBackend};
use quotad::grpc::GrpcServer;
use quotad::ratelimit::{LimiterSettings, RateLimiter};
use quotad::store::{AtomicStore, MemoryStore, RedisStore};

/// Shared per-identity rate limiting service.
#[derive(Debug, Parser)]
#[command(name = "quotad", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Address for the gRPC server
    #[arg(long)]
    grpc_addr: Option<SocketAddr>,

    /// State store backend
    #[arg(long, value_enum)]
    store: Option<StoreBackend>,

    /// Redis connection URL
    #[arg(long)]
    redis_url: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(self, config: &mut QuotadConfig) {
        if let Some(addr) = self.grpc_addr {
            config.server.grpc_addr = addr;
        }
        if let Some(backend) = self.store {
            config.store.backend = backend;
        }
        if let Some(url) = self.redis_url {
            config.store.redis_url = url;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

fn init_tracing(config: &QuotadConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .init(),
    }
}

/// Connect the configured store, verify it answers, and build the limiter.
async fn build_rate_limiter(config: &QuotadConfig) -> anyhow::Result<RateLimiter> {
    let settings: LimiterSettings = config.limiter_settings();

    match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-process memory store; counters are not shared across replicas");
            let store = Arc::new(MemoryStore::new());
            let _sweeper = store.spawn_sweeper(config.sweep_interval(), Arc::new(SystemClock));
            info!(
                interval_ms = config.sweep_interval().as_millis() as u64,
                "Expired counter sweeper started"
            );
            Ok(RateLimiter::from_store(store, settings))
        }
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.store.redis_url)
                .await
                .with_context(|| format!("failed to connect to {}", config.store.redis_url))?;
            tokio::time::timeout(config.store_timeout(), store.ping())
                .await
                .context("Redis ping timed out")?
                .context("Redis ping failed")?;
            info!(url = %config.store.redis_url, "Redis store ready");
            Ok(RateLimiter::from_store(Arc::new(store), settings))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = QuotadConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    init_tracing(&config);

    info!("Starting quotad Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        grpc_addr = %config.server.grpc_addr,
        store = ?config.store.backend,
        "Configuration loaded"
    );

    let rate_limiter = Arc::new(build_rate_limiter(&config).await?);
    info!("Rate limiter initialized");

    let grpc_server = GrpcServer::new(config.server.grpc_addr, rate_limiter);

    // Run the server with graceful shutdown on Ctrl+C
    grpc_server.serve_with_shutdown(shutdown_signal()).await?;

    info!("quotad Rate Limiting Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
