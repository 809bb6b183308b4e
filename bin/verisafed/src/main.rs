//! `verisafed` — the verisafe identity & access server.
//!
//! Usage:
//!   verisafed -c <context-name-or-path> [--listen <addr>]
//!
//! The context name resolves to `/etc/verisafe/<name>.toml`.
//! If a path with `/` or `.` is given, it's used directly.

mod config;

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use verisafe_auth::service::events::LogSink;
use verisafe_auth::service::sweep::spawn_sweeps;
use verisafe_auth::{api, AuthService};
use verisafe_sql::{SQLStore, SqliteStore};

use config::ServerConfig;

/// verisafe server.
#[derive(Parser, Debug)]
#[command(name = "verisafed", about = "verisafe identity & access server")]
struct Cli {
    /// Context name or path to config file.
    #[arg(short = 'c', long = "config", required = true)]
    config: String,

    /// Listen address (overrides the config file).
    #[arg(long = "listen")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config_path = ServerConfig::resolve_path(&cli.config);
    info!("Loading configuration from {}", config_path.display());
    let server_config = ServerConfig::load(&config_path)?;
    let listen = cli.listen.unwrap_or_else(|| server_config.listen.clone());

    std::fs::create_dir_all(&server_config.storage.data_dir)?;
    let sql: Arc<dyn SQLStore> = Arc::new(
        SqliteStore::open(&server_config.db_path())
            .map_err(|e| anyhow::anyhow!("failed to open SQL store: {}", e))?,
    );

    let svc = AuthService::new(sql, Arc::new(LogSink), server_config.auth_config())
        .map_err(|e| anyhow::anyhow!("failed to initialize auth service: {}", e))?;
    info!("Auth service initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeps = spawn_sweeps(Arc::clone(&svc), shutdown_rx);

    let app = api::build_router(svc);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!("verisafe server listening on {}", listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Stop the background sweeps and wait for them to drain.
    let _ = shutdown_tx.send(true);
    for handle in sweeps {
        let _ = handle.await;
    }

    Ok(())
}
