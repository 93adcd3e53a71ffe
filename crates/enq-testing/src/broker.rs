use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use enq_core::{Broker, EngineError, JobId};

/// An in-memory [`Broker`]. `pop_ready` never actually blocks for
/// `max_block` — it returns immediately whether or not a ready id is
/// present, since there is no other writer to wait on in a single-process
/// test.
#[derive(Default)]
pub struct InMemoryBroker {
    ready: Mutex<HashMap<String, Vec<JobId>>>,
    delayed: Mutex<HashMap<String, Vec<(JobId, DateTime<Utc>)>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready_len(&self, tenant_id: &str) -> usize {
        self.ready.lock().unwrap().get(tenant_id).map_or(0, Vec::len)
    }

    pub fn delayed_len(&self, tenant_id: &str) -> usize {
        self.delayed.lock().unwrap().get(tenant_id).map_or(0, Vec::len)
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
        run_at: DateTime<Utc>,
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
            .and_then(Vec::pop))
    }

    async fn promote_due(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
        batch: i64,
    ) -> Result<u64, EngineError> {
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
