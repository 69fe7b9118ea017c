use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use rewards_ledger::config::LedgerConfig;
use rewards_ledger::server::{self, AppState};
use rewards_ledger::store::{LedgerStore, MemoryStore};
use rewards_ledger::util::time_source::SystemTimeSource;
use rewards_ledger::{logging, Ledger, TokenResolver};

#[derive(Debug, Parser)]
#[command(name = "rewards-ledger", version, about = "Ad-reward earnings ledger service")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "REWARDS_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// `sqlite:` database URL; in-memory when omitted.
    #[arg(long)]
    database_url: Option<String>,

    /// Log filter directive, e.g. `info` or `rewards_ledger=debug`.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => LedgerConfig::load(path)?,
        None => LedgerConfig::default(),
    };
    config.apply_env()?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(url) = cli.database_url {
        config.database_url = Some(url);
    }
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }

    logging::init_tracing(&config.log)?;

    let store = open_store(config.database_url.as_deref()).await?;
    let ledger = Ledger::new(&config, store, Arc::new(SystemTimeSource))?;

    let resolver = TokenResolver::from_grants(&config.tokens);
    if resolver.is_empty() {
        tracing::warn!("No bearer tokens configured; every authenticated route will answer 401");
    }

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    let state = AppState::new(Arc::new(ledger), Arc::new(resolver));

    server::serve(listener, state, shutdown_signal()).await?;
    Ok(())
}

async fn open_store(database_url: Option<&str>) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match database_url {
        None => {
            tracing::info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "sqlite")]
        Some(url) => {
            let store = rewards_ledger::store::SqliteStore::connect(url)
                .await
                .with_context(|| format!("failed to open database {url}"))?;
            tracing::info!(url, "Using SQLite store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        Some(url) => anyhow::bail!("database {url} requested but the `sqlite` feature is disabled"),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
