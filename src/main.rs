//! Entry point: load configuration, connect the repository layer (running
//! migrations), wire the cache, AI service, and pipeline, then serve the
//! HTTP surface until SIGTERM/SIGINT.

mod admin;
mod ai;
mod app;
mod cache;
mod channels;
mod config;
mod domain;
mod error;
mod pipeline;
mod repository;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use admin::AdminState;
use ai::cost::CostLogger;
use ai::pricing::PricingResolver;
use ai::GeminiAiService;
use cache::CacheManager;
use channels::ChannelState;
use config::Config;
use pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "chatledger")]
#[command(about = "Multi-channel chat-to-expense ingress")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server (default if no subcommand is given)
    Run,
    /// Apply pending migrations and exit
    Migrate,
    /// Validate configuration and exit
    TestConfig,
    /// Print version and exit
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    match command {
        Commands::Run => run().await,
        Commands::Migrate => migrate().await,
        Commands::TestConfig => test_config().await,
        Commands::Version => {
            println!("chatledger v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run() -> Result<()> {
    let config = Config::load_from_env().context("loading configuration")?;
    tracing::info!(summary = ?config.summary(), "starting chatledger");

    let repos = Arc::new(
        repository::factory::connect(&config)
            .await
            .context("connecting repository layer")?,
    );
    let cache = Arc::new(CacheManager::new());

    let pricing = PricingResolver::new(repos.pricing.clone());
    let cost_logger = CostLogger::spawn(repos.ai_costs.clone());
    let ai_service = Arc::new(GeminiAiService::new(config.ai.clone(), pricing, cost_logger));

    let pipeline = Arc::new(Pipeline::new(repos.clone(), cache.clone(), ai_service));
    let config = Arc::new(config);

    let channel_state = ChannelState::new(pipeline.clone(), config.clone(), repos.clone());
    let admin_state = AdminState {
        repos: repos.clone(),
        config: config.clone(),
    };

    spawn_cache_maintenance(cache.clone());

    let router = app::build_router(channel_state, admin_state);
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("serving HTTP")?;

    Ok(())
}

async fn migrate() -> Result<()> {
    let config = Config::load_from_env().context("loading configuration")?;
    repository::factory::connect(&config)
        .await
        .context("applying migrations")?;
    println!("migrations applied");
    Ok(())
}

async fn test_config() -> Result<()> {
    let config = Config::load_from_env().context("loading configuration")?;
    config.validate().context("validating configuration")?;
    println!("configuration is valid");
    println!("{:#?}", config.summary());
    Ok(())
}

/// Sweeps expired cache entries on a fixed interval so TTL'd data is
/// reclaimed even for caches that go quiet (no natural access to trigger
/// lazy expiry).
fn spawn_cache_maintenance(cache: Arc<CacheManager>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let evicted = cache.cleanup_expired().await;
            if evicted > 0 {
                tracing::debug!(evicted, "swept expired cache entries");
            }
        }
    });
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("installing Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .init();
}
