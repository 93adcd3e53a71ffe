//! The HTTP API process: accepts enqueue/lease/complete/fail requests and
//! talks to Postgres (ledger) and Redis (broker) directly, with no
//! in-process scheduling of its own.

use std::sync::Arc;

use anyhow::Context;
use enq_api::{build_router, AppState};
use enq_core::Coordinator;
use enq_postgres::PgLedger;
use enq_redis::RedisBroker;
use enq_server::ServerConfig;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("loading configuration")?;
    enq_server::telemetry::init(&config.app_env);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.postgres_dsn)
        .await
        .context("connecting to postgres")?;
    sqlx::migrate!("../enq-postgres/migrations")
        .run(&pool)
        .await
        .context("running migrations")?;

    let ledger = Arc::new(PgLedger::new(pool));
    let broker = Arc::new(
        RedisBroker::connect(&config.redis_url())
            .await
            .context("connecting to redis")?,
    );
    let coordinator = Arc::new(Coordinator::new(ledger.clone(), broker));
    let state = AppState::new(coordinator, ledger, config.default_visibility_timeout_sec);

    let router = build_router(state);
    let listener = TcpListener::bind(bind_addr(&config.api_addr))
        .await
        .with_context(|| format!("binding {}", config.api_addr))?;

    tracing::info!(addr = %config.api_addr, "enq-api-server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    Ok(())
}

/// The original addresses are Go-style (`:8080`, bind-all-interfaces
/// implied); axum's listener wants an explicit host.
fn bind_addr(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        addr.to_string()
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install Ctrl+C handler");
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}
