use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use enq_core::{EngineError, InsertParams, Job, JobId, JobStatus, JobView, Ledger, Mutation};

/// An in-memory [`Ledger`], guarded by a single [`Mutex`]. Good enough for
/// deterministic tests; not a concurrency model worth copying for a real
/// backend (see `enq-postgres::PgLedger` for that).
#[derive(Default)]
pub struct InMemoryLedger {
    rows: Mutex<HashMap<JobId, Job>>,
    api_key_map: Mutex<HashMap<String, String>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every row currently held, for test assertions that need to
    /// inspect state the `Ledger` trait doesn't expose directly.
    pub fn snapshot(&self) -> Vec<Job> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    /// Seed a tenant's API key, so `tenant_by_api_key_hash` resolves it.
    /// `enq-core`'s trait only reads this mapping; writing it is entirely
    /// a test concern, there being no tenant-creation operation in scope.
    pub fn seed_tenant(&self, tenant_id: &str, api_key_hash: &str) {
        self.api_key_map
            .lock()
            .unwrap()
            .insert(api_key_hash.to_string(), tenant_id.to_string());
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn insert(&self, params: InsertParams) -> Result<JobId, EngineError> {
        let mut rows = self.rows.lock().unwrap();

        if let Some(dedupe_key) = &params.dedupe_key {
            let ttl = params.dedupe_ttl_sec.unwrap_or(0);
            let now = Utc::now();
            let clash = rows.values().find(|j| {
                j.tenant_id == params.tenant_id
                    && j.dedupe_key.as_deref() == Some(dedupe_key.as_str())
                    && !j.status.is_terminal()
                    && (now - j.created_at) < chrono::Duration::seconds(ttl)
            });
            if let Some(existing) = clash {
                return Err(EngineError::Duplicate {
                    existing_id: existing.id,
                });
            }
        }

        let id = uuid::Uuid::new_v4();
        let now = Utc::now();
        rows.insert(
            id,
            Job {
                id,
                tenant_id: params.tenant_id,
                job_type: params.job_type,
                payload: params.payload,
                priority: params.priority,
                run_at: params.run_at,
                dedupe_key: params.dedupe_key,
                dedupe_ttl_sec: params.dedupe_ttl_sec,
                attempt: 0,
                max_attempts: params.max_attempts,
                backoff_policy: params.backoff_policy,
                visibility_timeout_sec: params.visibility_timeout_sec,
                status: JobStatus::Queued,
                leased_by: None,
                lease_expires_at: None,
                error: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn cas(
        &self,
        id: JobId,
        tenant_id: &str,
        from_states: &[JobStatus],
        mutation: Mutation,
    ) -> Result<bool, EngineError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(job) = rows.get_mut(&id) else {
            return Ok(false);
        };
        if job.tenant_id != tenant_id || !from_states.contains(&job.status) {
            return Ok(false);
        }

        if let Some(status) = mutation.status {
            job.status = status;
        }
        if let Some(attempt) = mutation.attempt {
            job.attempt = attempt;
        }
        if let Some(run_at) = mutation.run_at {
            job.run_at = run_at;
        }
        if let Some(error) = mutation.error {
            job.error = error;
        }
        if let Some(leased_by) = mutation.leased_by {
            job.leased_by = leased_by;
        }
        if let Some(lease_expires_at) = mutation.lease_expires_at {
            job.lease_expires_at = lease_expires_at;
        }
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn get_for_lease(&self, id: JobId, tenant_id: &str) -> Result<Job, EngineError> {
        let rows = self.rows.lock().unwrap();
        let job = rows.get(&id).ok_or(EngineError::NotFound)?;
        if job.tenant_id != tenant_id {
            return Err(EngineError::NotFound);
        }
        if job.status != JobStatus::Queued {
            return Err(EngineError::NotQueued);
        }
        Ok(job.clone())
    }

    async fn get(&self, id: JobId, tenant_id: &str) -> Result<Job, EngineError> {
        let rows = self.rows.lock().unwrap();
        rows.get(&id)
            .filter(|j| j.tenant_id == tenant_id)
            .cloned()
            .ok_or(EngineError::NotFound)
    }

    async fn list_due_queued(&self, tenant_id: &str, limit: i64) -> Result<Vec<JobId>, EngineError> {
        let rows = self.rows.lock().unwrap();
        let now = Utc::now();
        let mut due: Vec<&Job> = rows
            .values()
            .filter(|j| j.tenant_id == tenant_id && j.status == JobStatus::Queued && j.run_at <= now)
            .collect();
        due.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(due.into_iter().take(limit as usize).map(|j| j.id).collect())
    }

    async fn list_expired_leases(&self, tenant_id: &str, limit: i64) -> Result<Vec<JobId>, EngineError> {
        let rows = self.rows.lock().unwrap();
        let now = Utc::now();
        Ok(rows
            .values()
            .filter(|j| {
                j.tenant_id == tenant_id
                    && j.status == JobStatus::Leased
                    && j.lease_expires_at.map(|e| e < now).unwrap_or(false)
            })
            .take(limit as usize)
            .map(|j| j.id)
            .collect())
    }

    async fn list_active_tenants(&self) -> Result<Vec<String>, EngineError> {
        let rows = self.rows.lock().unwrap();
        let mut set: BTreeMap<String, ()> = BTreeMap::new();
        for j in rows.values().filter(|j| !j.status.is_terminal()) {
            set.insert(j.tenant_id.clone(), ());
        }
        Ok(set.into_keys().collect())
    }

    async fn summary(&self, tenant_id: &str, limit: i64) -> Result<Vec<JobView>, EngineError> {
        let rows = self.rows.lock().unwrap();
        let mut jobs: Vec<&Job> = rows.values().filter(|j| j.tenant_id == tenant_id).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs.into_iter().take(limit as usize).map(JobView::from).collect())
    }

    async fn summary_one(&self, id: JobId, tenant_id: &str) -> Result<JobView, EngineError> {
        let rows = self.rows.lock().unwrap();
        rows.get(&id)
            .filter(|j| j.tenant_id == tenant_id)
            .map(JobView::from)
            .ok_or(EngineError::NotFound)
    }

    async fn tenant_by_api_key_hash(&self, api_key_hash: &str) -> Result<Option<String>, EngineError> {
        Ok(self.api_key_map.lock().unwrap().get(api_key_hash).cloned())
    }
}
