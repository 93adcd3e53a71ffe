//! Redis-backed [`Broker`]: a ready list and a delay sorted set per tenant.
//!
//! Key layout follows the original system's naming directly:
//!
//! - `queue:<tenant>` — a `LIST`, pushed with `LPUSH`, drained with `BRPOP`
//!   so the oldest-pushed id comes out first.
//! - `delay:<tenant>` — a `ZSET` scored by the job's `run_at` as a Unix
//!   timestamp, so `ZRANGEBYSCORE ... -inf <now>` finds everything due.
//!
//! [`RedisBroker::promote_due`] moves ids from the delay set to the ready
//! list inside a single pipelined transaction (`MULTI`/`EXEC`), mirroring
//! the original scheduler's `TxPipeline` — if the pipeline aborts partway,
//! no id is left duplicated in both structures, and an id that is pushed
//! twice by a retried promotion is harmless (the coordinator's lease path
//! already tolerates a stale id by discarding it).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use enq_core::{Broker, EngineError, JobId};
use redis::AsyncCommands;

fn redis_err(e: redis::RedisError) -> EngineError {
    EngineError::BrokerUnavailable(e.to_string())
}

fn ready_key(tenant_id: &str) -> String {
    format!("queue:{tenant_id}")
}

fn delay_key(tenant_id: &str) -> String {
    format!("delay:{tenant_id}")
}

/// A Redis-backed [`Broker`], holding a cloneable
/// [`redis::aio::ConnectionManager`] that reconnects transparently on its
/// own, so a dropped connection never needs to be handled here.
#[derive(Clone)]
pub struct RedisBroker {
    conn: redis::aio::ConnectionManager,
}

impl RedisBroker {
    pub async fn connect(redis_url: &str) -> Result<Self, EngineError> {
        let client = redis::Client::open(redis_url).map_err(redis_err)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(redis_err)?;
        Ok(RedisBroker { conn })
    }

    pub fn from_connection_manager(conn: redis::aio::ConnectionManager) -> Self {
        RedisBroker { conn }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push_ready(&self, tenant_id: &str, id: JobId) -> Result<(), EngineError> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(ready_key(tenant_id), id.to_string())
            .await
            .map_err(redis_err)
    }

    async fn push_ready_many(&self, tenant_id: &str, ids: &[JobId]) -> Result<(), EngineError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let members: Vec<String> = ids.iter().map(ToString::to_string).collect();
        conn.lpush::<_, _, ()>(ready_key(tenant_id), members)
            .await
            .map_err(redis_err)
    }

    async fn push_delayed(
        &self,
        tenant_id: &str,
        id: JobId,
        run_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(delay_key(tenant_id), id.to_string(), run_at.timestamp())
            .await
            .map_err(redis_err)
    }

    async fn pop_ready(
        &self,
        tenant_id: &str,
        max_block: Duration,
    ) -> Result<Option<JobId>, EngineError> {
        let mut conn = self.conn.clone();
        let result: Option<(String, String)> = conn
            .brpop(ready_key(tenant_id), max_block.as_secs_f64())
            .await
            .map_err(redis_err)?;

        match result {
            Some((_key, raw_id)) => {
                let id = raw_id.parse().map_err(|_| {
                    EngineError::Fatal(format!("ready list contained a non-uuid member: {raw_id}"))
                })?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    async fn promote_due(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
        batch: i64,
    ) -> Result<u64, EngineError> {
        let mut conn = self.conn.clone();
        let due: Vec<String> = conn
            .zrangebyscore_limit(delay_key(tenant_id), "-inf", now.timestamp(), 0, batch)
            .await
            .map_err(redis_err)?;

        if due.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for member in &due {
            pipe.lpush(ready_key(tenant_id), member).ignore();
            pipe.zrem(delay_key(tenant_id), member).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await.map_err(redis_err)?;

        Ok(due.len() as u64)
    }
}
