//! The [`Broker`] trait: a constant-time ready-queue and delay-queue index
//! over job ids. Holds no payloads — it is a cache over the ledger, never
//! a source of truth.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::job::JobId;

/// The fast ready/delay index, scoped per tenant.
///
/// All operations are pipelineable; [`Broker::promote_due`] must execute
/// its list-push and set-remove as a single multi-operation transaction so
/// an id is never duplicated in both structures mid-promotion.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Push `id` onto the ready list (consumed FIFO by `pop_ready`).
    async fn push_ready(&self, tenant_id: &str, id: JobId) -> Result<(), EngineError>;

    /// Batch variant of [`Broker::push_ready`], used by reconciliation.
    async fn push_ready_many(&self, tenant_id: &str, ids: &[JobId]) -> Result<(), EngineError>;

    /// Add `id` to the delay set, scored by `run_at` (epoch seconds).
    async fn push_delayed(
        &self,
        tenant_id: &str,
        id: JobId,
        run_at: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    /// Block up to `max_block` for a ready id; `None` if none became
    /// available in that window.
    async fn pop_ready(&self, tenant_id: &str, max_block: Duration) -> Result<Option<JobId>, EngineError>;

    /// Atomically move up to `batch` ids whose score is `<= now` from the
    /// delay set to the ready list. Returns the count moved.
    async fn promote_due(&self, tenant_id: &str, now: DateTime<Utc>, batch: i64) -> Result<u64, EngineError>;
}
