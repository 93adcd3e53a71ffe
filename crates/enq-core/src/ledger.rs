//! The [`Ledger`] trait: the authoritative, transactional store of record.
//!
//! Mirrors the shape of the teacher's `JobStore` trait (claim/succeed/fail/
//! heartbeat) but widened to the full state machine this engine needs:
//! a tenant-scoped CAS primitive, due/expired-lease scans for the
//! scheduler, and a read projection for the API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::job::{Job, JobId, JobStatus, JobView};

/// A mutation applied by [`Ledger::cas`]. Each field that is `Some` is
/// written; the ones left `None` are untouched. `cas` is the *only* path
/// for status changes — direct writes are prohibited.
#[derive(Debug, Clone, Default)]
pub struct Mutation {
    pub status: Option<JobStatus>,
    pub attempt: Option<i32>,
    pub run_at: Option<DateTime<Utc>>,
    pub error: Option<Option<String>>,
    pub leased_by: Option<Option<String>>,
    pub lease_expires_at: Option<Option<DateTime<Utc>>>,
}

impl Mutation {
    pub fn to_status(status: JobStatus) -> Self {
        Mutation {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_attempt(mut self, attempt: i32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_leased_by(mut self, leased_by: Option<String>) -> Self {
        self.leased_by = Some(leased_by);
        self
    }

    pub fn with_lease_expires_at(mut self, lease_expires_at: Option<DateTime<Utc>>) -> Self {
        self.lease_expires_at = Some(lease_expires_at);
        self
    }
}

/// The authoritative, transactional store of job rows.
///
/// All mutating operations set `updated_at` to now. Implementors must hold
/// a row lock for the duration of a single `cas`/`getForLease` transaction
/// and never across broker I/O (spec §5).
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Atomically insert a new row in `queued`, `attempt = 0`.
    ///
    /// Returns [`EngineError::Duplicate`] if `(tenant_id, dedupe_key)`
    /// matches a live, non-terminal entry inside its TTL window.
    async fn insert(&self, params: crate::job::InsertParams) -> Result<JobId, EngineError>;

    /// Update the row only if `status` is one of `from_states`. `mutation`
    /// carries the new status and any companion field changes. Returns
    /// whether the predicate matched and the update applied.
    async fn cas(
        &self,
        id: JobId,
        tenant_id: &str,
        from_states: &[JobStatus],
        mutation: Mutation,
    ) -> Result<bool, EngineError>;

    /// Fetch the row inside a `SELECT ... FOR UPDATE` transaction that
    /// commits before this call returns — the row lock is held only for
    /// the duration of this read, not across the `cas` call that follows
    /// it in [`Coordinator::lease`](crate::coordinator::Coordinator::lease).
    /// Lease safety comes from `cas`'s own `status` predicate (only one
    /// caller's CAS out of `queued` can ever apply), not from this lock
    /// spanning both calls. Returns [`EngineError::NotFound`] if absent,
    /// [`EngineError::NotQueued`] if `status != queued`.
    async fn get_for_lease(&self, id: JobId, tenant_id: &str) -> Result<Job, EngineError>;

    /// Fetch a job for read-only purposes (lease-owner checks, fail's
    /// attempt/max_attempts read), regardless of status.
    async fn get(&self, id: JobId, tenant_id: &str) -> Result<Job, EngineError>;

    /// Ids of rows where `status = queued ∧ run_at <= now`, ordered by
    /// `(priority asc, created_at asc)`.
    async fn list_due_queued(&self, tenant_id: &str, limit: i64) -> Result<Vec<JobId>, EngineError>;

    /// Ids of rows where `status = leased ∧ lease_expires_at < now`.
    async fn list_expired_leases(
        &self,
        tenant_id: &str,
        limit: i64,
    ) -> Result<Vec<JobId>, EngineError>;

    /// Distinct tenant ids with at least one non-terminal job. Used by the
    /// scheduler to enumerate tenants per tick.
    async fn list_active_tenants(&self) -> Result<Vec<String>, EngineError>;

    /// Read-only projection for the API's job listing, most recent first.
    async fn summary(&self, tenant_id: &str, limit: i64) -> Result<Vec<JobView>, EngineError>;

    /// Read-only projection for a single job, for the API's job-by-id fetch.
    async fn summary_one(&self, id: JobId, tenant_id: &str) -> Result<JobView, EngineError>;

    /// Resolve a tenant id from a bearer API key, for the auth boundary.
    async fn tenant_by_api_key_hash(&self, api_key_hash: &str) -> Result<Option<String>, EngineError>;
}
