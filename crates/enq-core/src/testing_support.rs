//! Minimal in-memory `Ledger`/`Broker` fakes used only by this crate's own
//! unit tests. The richer, publicly exported fakes used by downstream
//! crates live in `enq-testing` — kept separate so `enq-core` never has to
//! depend on a crate that depends on it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::broker::Broker;
use crate::error::EngineError;
use crate::job::{InsertParams, Job, JobId, JobStatus, JobView};
use crate::ledger::{Ledger, Mutation};

#[derive(Default)]
pub(crate) struct InMemoryLedger {
    rows: Mutex<HashMap<JobId, Job>>,
}

impl InMemoryLedger {
    pub(crate) fn new() -> Self {
        Self::default()
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

    async fn tenant_by_api_key_hash(&self, _api_key_hash: &str) -> Result<Option<String>, EngineError> {
        Ok(None)
    }
}

#[derive(Default)]
pub(crate) struct InMemoryBroker {
    ready: Mutex<HashMap<String, Vec<JobId>>>,
    delayed: Mutex<HashMap<String, Vec<(JobId, chrono::DateTime<Utc>)>>>,
}

impl InMemoryBroker {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn push_ready(&self, tenant_id: &str, id: JobId) -> Result<(), EngineError> {
        self.ready
            .lock()
            .unwrap()
            .entry(tenant_id.to_string())
            .or_default()
            .insert(0, id);
        Ok(())
    }

    async fn push_ready_many(&self, tenant_id: &str, ids: &[JobId]) -> Result<(), EngineError> {
        let mut ready = self.ready.lock().unwrap();
        let list = ready.entry(tenant_id.to_string()).or_default();
        for id in ids {
            list.insert(0, *id);
        }
        Ok(())
    }

    async fn push_delayed(
        &self,
        tenant_id: &str,
        id: JobId,
        run_at: chrono::DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.delayed
            .lock()
            .unwrap()
            .entry(tenant_id.to_string())
            .or_default()
            .push((id, run_at));
        Ok(())
    }

    async fn pop_ready(
        &self,
        tenant_id: &str,
        _max_block: Duration,
    ) -> Result<Option<JobId>, EngineError> {
        Ok(self
            .ready
            .lock()
            .unwrap()
            .get_mut(tenant_id)
            .and_then(|list| list.pop()))
    }

    async fn promote_due(&self, tenant_id: &str, now: chrono::DateTime<Utc>, batch: i64) -> Result<u64, EngineError> {
        let mut delayed = self.delayed.lock().unwrap();
        let Some(list) = delayed.get_mut(tenant_id) else {
            return Ok(0);
        };
        let (mut due, mut rest): (Vec<_>, Vec<_>) =
            list.drain(..).partition(|(_, run_at)| *run_at <= now);
        let overflow = due.split_off(due.len().min(batch as usize));
        rest.extend(overflow);
        *list = rest;
        let due: Vec<_> = due.into_iter().map(|(id, _)| id).collect();
        let count = due.len() as u64;
        drop(delayed);
        self.push_ready_many(tenant_id, &due).await?;
        Ok(count)
    }
}
