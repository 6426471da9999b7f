//! banking_ledger - Asynchronous Banking Ledger Service
//!
//! Clients open accounts, submit deposit/withdrawal requests, and read an
//! append-only transaction history. Requests are processed asynchronously: a
//! durable queue feeds a pool of workers that apply balance updates through
//! compare-and-swap and append the immutable ledger record.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
mod config;
mod db;
pub mod domain;
mod error;
pub mod queue;
pub mod store;
pub mod worker;

pub use config::Config;
pub use error::{AppError, AppResult};

use api::AppState;
use queue::{PgTransactionQueue, TransactionQueue};
use store::{BalanceStore, LedgerStore, PgBalanceStore, PgLedgerStore};
use worker::{TransactionWorker, WorkerPool};

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "banking_ledger=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the application router
fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::create_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    init_tracing();

    // Load configuration
    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("Starting banking_ledger server");
    tracing::info!("Connecting to database...");

    // Create database pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    // Bootstrap and verify database schema
    db::init_schema(&pool).await?;
    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    // Injected clients, owned by the process lifecycle
    let queue: Arc<dyn TransactionQueue> = Arc::new(PgTransactionQueue::with_lease(
        pool.clone(),
        config.queue_lease,
    ));
    let balances: Arc<dyn BalanceStore> = Arc::new(PgBalanceStore::new(pool.clone()));
    let ledger: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool.clone()));

    // Start the transaction consumers
    let transaction_worker = Arc::new(TransactionWorker::new(
        queue.clone(),
        balances.clone(),
        ledger.clone(),
        config.worker_config(),
    ));
    let worker_pool = WorkerPool::start(
        transaction_worker,
        config.worker_count,
        config.queue_poll_interval,
    );

    // Build router and start server
    let state = AppState::new(queue, balances, ledger);
    let app = build_router(state);

    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain in-flight messages before closing the stores they write to
    tracing::info!("Server shutting down...");
    worker_pool.shutdown().await;
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
