//! PostgreSQL-backed [`Ledger`] and process-advisory [`LeaderLock`].
//!
//! # Database schema
//!
//! See `migrations/0001_init.sql`. In short:
//!
//! ```sql
//! CREATE TABLE tenants (
//!     id TEXT PRIMARY KEY,
//!     api_key_hash TEXT NOT NULL UNIQUE,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE TABLE jobs (
//!     id UUID PRIMARY KEY,
//!     tenant_id TEXT NOT NULL REFERENCES tenants (id),
//!     job_type TEXT NOT NULL,
//!     payload JSONB NOT NULL,
//!     priority INTEGER NOT NULL DEFAULT 100,
//!     run_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     dedupe_key TEXT,
//!     dedupe_ttl_sec BIGINT,
//!     attempt INTEGER NOT NULL DEFAULT 0,
//!     max_attempts INTEGER NOT NULL DEFAULT 10,
//!     backoff_policy TEXT NOT NULL DEFAULT 'exponential',
//!     visibility_timeout_sec BIGINT NOT NULL DEFAULT 60,
//!     status TEXT NOT NULL DEFAULT 'queued',
//!     leased_by TEXT,
//!     lease_expires_at TIMESTAMPTZ,
//!     error TEXT,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use enq_postgres::PgLedger;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect(&dsn).await?;
//! let ledger = PgLedger::new(pool);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use enq_core::{
    EngineError, InsertParams, Job, JobId, JobStatus, JobView, LeaderLock, Ledger, Mutation,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::str::FromStr;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

fn db_err(e: sqlx::Error) -> EngineError {
    EngineError::StorageUnavailable(e.to_string())
}

fn parse_status(raw: &str) -> Result<JobStatus, EngineError> {
    JobStatus::from_str(raw).map_err(EngineError::Fatal)
}

fn parse_backoff(raw: &str) -> Result<enq_core::BackoffPolicy, EngineError> {
    enq_core::BackoffPolicy::from_str(raw).map_err(EngineError::Fatal)
}

fn job_from_row(row: &PgRow) -> Result<Job, EngineError> {
    Ok(Job {
        id: row.try_get("id").map_err(db_err)?,
        tenant_id: row.try_get("tenant_id").map_err(db_err)?,
        job_type: row.try_get("job_type").map_err(db_err)?,
        payload: row.try_get("payload").map_err(db_err)?,
        priority: row.try_get("priority").map_err(db_err)?,
        run_at: row.try_get("run_at").map_err(db_err)?,
        dedupe_key: row.try_get("dedupe_key").map_err(db_err)?,
        dedupe_ttl_sec: row.try_get("dedupe_ttl_sec").map_err(db_err)?,
        attempt: row.try_get("attempt").map_err(db_err)?,
        max_attempts: row.try_get("max_attempts").map_err(db_err)?,
        backoff_policy: parse_backoff(row.try_get("backoff_policy").map_err(db_err)?)?,
        visibility_timeout_sec: row.try_get("visibility_timeout_sec").map_err(db_err)?,
        status: parse_status(row.try_get("status").map_err(db_err)?)?,
        leased_by: row.try_get("leased_by").map_err(db_err)?,
        lease_expires_at: row.try_get("lease_expires_at").map_err(db_err)?,
        error: row.try_get("error").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

const JOB_COLUMNS: &str = "id, tenant_id, job_type, payload, priority, run_at, dedupe_key, \
     dedupe_ttl_sec, attempt, max_attempts, backoff_policy, visibility_timeout_sec, status, \
     leased_by, lease_expires_at, error, created_at, updated_at";

/// The authoritative job store, backed by a single Postgres table guarded
/// by `FOR UPDATE`-style claims and single-statement compare-and-swap
/// updates.
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        PgLedger { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn insert(&self, params: InsertParams) -> Result<JobId, EngineError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        if let (Some(dedupe_key), Some(ttl)) = (&params.dedupe_key, params.dedupe_ttl_sec) {
            let existing: Option<Uuid> = sqlx::query_scalar(
                r#"
                SELECT id FROM jobs
                WHERE tenant_id = $1
                  AND dedupe_key = $2
                  AND status NOT IN ('succeeded', 'failed_perm', 'dead_lettered')
                  AND created_at > NOW() - make_interval(secs => $3)
                FOR UPDATE
                LIMIT 1
                "#,
            )
            .bind(&params.tenant_id)
            .bind(dedupe_key)
            .bind(ttl as f64)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

            if let Some(existing_id) = existing {
                return Err(EngineError::Duplicate { existing_id });
            }
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, tenant_id, job_type, payload, priority, run_at,
                dedupe_key, dedupe_ttl_sec, attempt, max_attempts,
                backoff_policy, visibility_timeout_sec, status,
                created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, 0, $9, $10, $11, 'queued', NOW(), NOW()
            )
            "#,
        )
        .bind(id)
        .bind(&params.tenant_id)
        .bind(&params.job_type)
        .bind(&params.payload)
        .bind(params.priority)
        .bind(params.run_at)
        .bind(&params.dedupe_key)
        .bind(params.dedupe_ttl_sec)
        .bind(params.max_attempts)
        .bind(params.backoff_policy.to_string())
        .bind(params.visibility_timeout_sec)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(id)
    }

    async fn cas(
        &self,
        id: JobId,
        tenant_id: &str,
        from_states: &[JobStatus],
        mutation: Mutation,
    ) -> Result<bool, EngineError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE jobs SET updated_at = NOW()");

        if let Some(status) = mutation.status {
            qb.push(", status = ").push_bind(status.to_string());
        }
        if let Some(attempt) = mutation.attempt {
            qb.push(", attempt = ").push_bind(attempt);
        }
        if let Some(run_at) = mutation.run_at {
            qb.push(", run_at = ").push_bind(run_at);
        }
        if let Some(error) = mutation.error {
            qb.push(", error = ").push_bind(error);
        }
        if let Some(leased_by) = mutation.leased_by {
            qb.push(", leased_by = ").push_bind(leased_by);
        }
        if let Some(lease_expires_at) = mutation.lease_expires_at {
            qb.push(", lease_expires_at = ").push_bind(lease_expires_at);
        }

        let from_states: Vec<String> = from_states.iter().map(|s| s.to_string()).collect();
        qb.push(" WHERE id = ")
            .push_bind(id)
            .push(" AND tenant_id = ")
            .push_bind(tenant_id.to_string())
            .push(" AND status = ANY(")
            .push_bind(from_states)
            .push(")");

        let result = qb.build().execute(&self.pool).await.map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_for_lease(&self, id: JobId, tenant_id: &str) -> Result<Job, EngineError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 AND tenant_id = $2 FOR UPDATE"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or(EngineError::NotFound)?;

        let job = job_from_row(&row)?;
        tx.commit().await.map_err(db_err)?;

        if job.status != JobStatus::Queued {
            return Err(EngineError::NotQueued);
        }
        Ok(job)
    }

    async fn get(&self, id: JobId, tenant_id: &str) -> Result<Job, EngineError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(EngineError::NotFound)?;
        job_from_row(&row)
    }

    async fn list_due_queued(&self, tenant_id: &str, limit: i64) -> Result<Vec<JobId>, EngineError> {
        let rows: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM jobs
            WHERE tenant_id = $1 AND status = 'queued' AND run_at <= NOW()
            ORDER BY priority ASC, created_at ASC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows)
    }

    async fn list_expired_leases(
        &self,
        tenant_id: &str,
        limit: i64,
    ) -> Result<Vec<JobId>, EngineError> {
        let rows: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM jobs
            WHERE tenant_id = $1 AND status = 'leased' AND lease_expires_at < NOW()
            ORDER BY lease_expires_at ASC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows)
    }

    async fn list_active_tenants(&self) -> Result<Vec<String>, EngineError> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT tenant_id FROM jobs
            WHERE status NOT IN ('succeeded', 'failed_perm', 'dead_lettered')
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows)
    }

    async fn summary(&self, tenant_id: &str, limit: i64) -> Result<Vec<JobView>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, job_type, priority, run_at, attempt, max_attempts,
                   status, error, created_at, updated_at
            FROM jobs
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(job_view_from_row).collect()
    }

    async fn summary_one(&self, id: JobId, tenant_id: &str) -> Result<JobView, EngineError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, job_type, priority, run_at, attempt, max_attempts,
                   status, error, created_at, updated_at
            FROM jobs
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(EngineError::NotFound)?;
        job_view_from_row(&row)
    }

    async fn tenant_by_api_key_hash(&self, api_key_hash: &str) -> Result<Option<String>, EngineError> {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM tenants WHERE api_key_hash = $1")
            .bind(api_key_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(id)
    }
}

fn job_view_from_row(row: &PgRow) -> Result<JobView, EngineError> {
    Ok(JobView {
        id: row.try_get("id").map_err(db_err)?,
        tenant_id: row.try_get("tenant_id").map_err(db_err)?,
        job_type: row.try_get("job_type").map_err(db_err)?,
        priority: row.try_get("priority").map_err(db_err)?,
        run_at: row.try_get("run_at").map_err(db_err)?,
        attempt: row.try_get("attempt").map_err(db_err)?,
        max_attempts: row.try_get("max_attempts").map_err(db_err)?,
        status: parse_status(row.try_get("status").map_err(db_err)?)?,
        error: row.try_get("error").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

/// `pg_try_advisory_lock`-based leader election, matching the original
/// scheduler's literal `select pg_try_advisory_lock(42)` on a dedicated
/// session connection.
///
/// A session-level advisory lock is held until released or the connection
/// drops — so this keeps one pooled connection alive for as long as it can
/// and re-acquires a fresh one (and re-attempts the lock) if that
/// connection is ever lost, rather than holding the lock open forever with
/// no way to notice a dead session.
pub struct PgLeaderLock {
    pool: PgPool,
    conn: AsyncMutex<Option<sqlx::pool::PoolConnection<Postgres>>>,
}

/// Well-known advisory lock key for scheduler leadership, matching the
/// original Go scheduler's literal constant.
pub const LEADER_LOCK_KEY: i64 = 42;

impl PgLeaderLock {
    pub fn new(pool: PgPool) -> Self {
        PgLeaderLock {
            pool,
            conn: AsyncMutex::new(None),
        }
    }
}

#[async_trait]
impl LeaderLock for PgLeaderLock {
    async fn try_acquire(&self) -> Result<bool, EngineError> {
        let mut guard = self.conn.lock().await;

        if guard.is_none() {
            match self.pool.acquire().await {
                Ok(c) => *guard = Some(c),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to acquire a connection for the leader lock");
                    return Ok(false);
                }
            }
        }

        let conn = guard.as_mut().expect("just populated above");
        let result: Result<bool, sqlx::Error> =
            sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                .bind(LEADER_LOCK_KEY)
                .fetch_one(&mut **conn)
                .await;

        match result {
            Ok(acquired) => Ok(acquired),
            Err(e) => {
                tracing::warn!(error = %e, "leader lock connection failed, will reacquire next tick");
                *guard = None;
                Ok(false)
            }
        }
    }
}
