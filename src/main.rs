#![allow(dead_code)]

mod errors;
mod layers;
mod models;
mod routers;
mod services;

use crate::errors::AppError;
use crate::routers::router;
use clap::Parser;
use services::states::LinkState;
use services::states::config::AppConfig;
use services::states::db::DataBaseState;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[cfg(all(target_os = "windows", feature = "alternative-allocator"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(all(
    any(
        target_os = "linux",
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    ),
    feature = "alternative-allocator"
))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn tracing_init(level: &str) {
    use std::io::stdout;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, Layer};
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(stdout)
        .with_filter(EnvFilter::new(level));
    tracing_subscriber::registry().with(fmt_layer).init();
}

#[cfg_attr(test, ctor::ctor)]
fn init() {
    tracing_init("info,linkgate=debug");
}

#[derive(clap::Parser, Debug)]
#[clap(name = "linkgate", version)]
pub struct Cli {
    #[clap(short, long, help = "Path to config file", default_value = "linkgate.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(AppConfig::load(&cli.config)?);
    tracing_init(&config.common.log_level);
    let sqlx_opt = SqliteConnectOptions::from_str(&config.db.db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.db.busy_timeout_ms));
    let sqlx_pool = SqlitePoolOptions::new()
        .max_connections(config.db.sqlite_connection_nums)
        .connect_with(sqlx_opt)
        .await
        .map_err(AppError::SqlxError)?;
    let db = DataBaseState::new(sqlx_pool);
    #[cfg(feature = "migrate")]
    {
        tracing::info!("Preparing to run embed migrations...");
        db.migrate().await.map_err(|e| {
            tracing::error!("Failed to run migrations: {}", e);
            AppError::DataBase(e)
        })?;
        tracing::info!("Migrations completed successfully.");
    }
    let addr = format!("{}:{}", config.common.host, config.common.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        "Starting server at {}:{}",
        config.common.host,
        config.common.port
    );
    let link_state = Arc::new(LinkState::new(db, config));
    axum::serve(
        listener,
        router(link_state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(mut sigint), Ok(mut sigterm)) => {
                    tokio::select! {
                        _ = sigint.recv() => {},
                        _ = sigterm.recv() => {},
                    }
                }
                _ => {
                    tracing::error!("Failed to install signal handlers, falling back to ctrl-c");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(windows)]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        #[cfg(not(any(unix, windows)))]
        {
            tracing::warn!("Graceful shutdown is not supported on this platform.");
            futures::future::pending::<()>().await;
        }
        tracing::warn!("Received shutdown signal, shutting down gracefully...");
    })
    .await?;
    tracing::info!("Trying to close database connections...");
    match tokio::time::timeout(Duration::from_secs(15), link_state.db.close_conn()).await {
        Ok(_) => tracing::info!("Database connections closed."),
        Err(_) => tracing::error!("Timed out while closing database connections."),
    }
    Ok(())
}
