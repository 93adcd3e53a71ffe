//! The reconciliation scheduler process: promotes due delayed jobs,
//! re-announces queued jobs the broker lost track of, and recovers expired
//! leases. Exactly one replica does useful work at a time; the rest sit as
//! hot standbys behind the Postgres advisory lock.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use enq_core::{EngineConfig, Scheduler};
use enq_postgres::{PgLeaderLock, PgLedger};
use enq_redis::RedisBroker;
use enq_server::ServerConfig;
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("loading configuration")?;
    enq_server::telemetry::init(&config.app_env);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.postgres_dsn)
        .await
        .context("connecting to postgres")?;

    let ledger = Arc::new(PgLedger::new(pool.clone()));
    let broker = Arc::new(
        RedisBroker::connect(&config.redis_url())
            .await
            .context("connecting to redis")?,
    );
    let lock = Arc::new(PgLeaderLock::new(pool));
    let scheduler = Scheduler::new(ledger, broker, lock);

    tracing::info!("enq-scheduler starting reconciliation loop");

    let mut ticker = tokio::time::interval(EngineConfig::DEFAULT_SCHEDULER_TICK);
    let mut shutdown = std::pin::pin!(shutdown_signal());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match scheduler.tick().await {
                    Ok(report) if report.was_leader => {
                        tracing::debug!(
                            promoted = report.promoted,
                            reconciled = report.reconciled,
                            recovered = report.recovered,
                            "tick complete",
                        );
                    }
                    Ok(_) => {}
                    Err(err) => tracing::error!(error = %err, "reconciliation tick failed"),
                }
            }
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received, stopping scheduler loop");
                break;
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install Ctrl+C handler");
    }
    // give an in-flight tick a moment to finish before the process exits.
    tokio::time::sleep(Duration::from_millis(50)).await;
}
