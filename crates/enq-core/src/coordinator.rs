//! The protocol engine: enqueue, lease, extend, complete, fail.
//!
//! `Coordinator<L, B>` owns the correctness-critical sequencing of ledger
//! and broker calls described in spec §4.3. It is generic over the two
//! storage traits so production backends (`enq-postgres`, `enq-redis`) and
//! `enq-testing`'s in-memory fakes are interchangeable here and in tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::broker::Broker;
use crate::error::EngineError;
use crate::job::{
    BackoffPolicy, InsertParams, JobDefaults, JobId, JobStatus, JobView, LeasedJob,
};
use crate::ledger::{Ledger, Mutation};

/// Default extend-by, applied when a caller passes a non-positive value.
pub const DEFAULT_EXTEND_BY_SEC: i64 = 60;

/// Request body for [`Coordinator::enqueue`], already validated and
/// defaulted by the API layer (payload size bound, field defaults from
/// spec §6's `EnqueueReq` table).
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub tenant_id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub run_at: DateTime<Utc>,
    pub priority: i32,
    pub dedupe_key: Option<String>,
    pub dedupe_ttl_sec: Option<i64>,
    pub max_attempts: i32,
    pub backoff_policy: BackoffPolicy,
    pub visibility_timeout_sec: i64,
}

impl EnqueueRequest {
    /// Build a request applying spec §6's defaults for every omitted field.
    pub fn new(
        tenant_id: impl Into<String>,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        default_visibility_timeout_sec: i64,
    ) -> Self {
        EnqueueRequest {
            tenant_id: tenant_id.into(),
            job_type: job_type.into(),
            payload,
            run_at: Utc::now(),
            priority: JobDefaults::PRIORITY,
            dedupe_key: None,
            dedupe_ttl_sec: None,
            max_attempts: JobDefaults::MAX_ATTEMPTS,
            backoff_policy: JobDefaults::BACKOFF_POLICY,
            visibility_timeout_sec: default_visibility_timeout_sec,
        }
    }
}

/// Maximum opaque payload size accepted by the API's `enqueue` handler,
/// per spec §4.3.1 ("size bound is policy, default 256 KiB"). Validation
/// (spec §7) happens at the API boundary — it must never reach the
/// coordinator, so this constant lives here only to give the API crate a
/// shared default to check against.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 256 * 1024;

pub struct Coordinator<L: Ledger, B: Broker> {
    ledger: Arc<L>,
    broker: Arc<B>,
}

impl<L: Ledger, B: Broker> Coordinator<L, B> {
    pub fn new(ledger: Arc<L>, broker: Arc<B>) -> Self {
        Coordinator { ledger, broker }
    }

    /// §4.3.1 Enqueue.
    ///
    /// The ledger insert precedes the broker write so a broker failure
    /// never produces a ghost job with no record. If the broker push
    /// fails, the row is CAS'd to `failed_perm`; if even that fails, the
    /// row is left orphaned for the reconciliation sweep to repair.
    ///
    /// Payload size validation is an API-boundary concern (spec §7) and is
    /// not repeated here.
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<JobId, EngineError> {
        let id = self
            .ledger
            .insert(InsertParams {
                tenant_id: req.tenant_id.clone(),
                job_type: req.job_type,
                payload: req.payload,
                priority: req.priority,
                run_at: req.run_at,
                dedupe_key: req.dedupe_key,
                dedupe_ttl_sec: req.dedupe_ttl_sec,
                max_attempts: req.max_attempts,
                backoff_policy: req.backoff_policy,
                visibility_timeout_sec: req.visibility_timeout_sec,
            })
            .await?;

        let push_result = if req.run_at > Utc::now() {
            self.broker.push_delayed(&req.tenant_id, id, req.run_at).await
        } else {
            self.broker.push_ready(&req.tenant_id, id).await
        };

        if let Err(push_err) = push_result {
            let reason = push_err.to_string();
            let applied = self
                .ledger
                .cas(
                    id,
                    &req.tenant_id,
                    &[JobStatus::Queued],
                    Mutation::to_status(JobStatus::FailedPerm)
                        .with_error(Some(format!("enqueue broker push failed: {reason}"))),
                )
                .await
                .unwrap_or(false);

            if !applied {
                tracing::warn!(
                    job_id = %id,
                    tenant_id = %req.tenant_id,
                    "enqueue broker push failed and CAS to failed_perm did not apply; \
                     row is orphaned from the broker until reconciliation repairs it"
                );
            }

            return Err(push_err);
        }

        Ok(id)
    }

    /// §4.3.2 Lease.
    pub async fn lease(
        &self,
        tenant_id: &str,
        worker_id: &str,
        visibility_timeout_override: Option<i64>,
        max_block: Duration,
    ) -> Result<Option<LeasedJob>, EngineError> {
        let id = match self.broker.pop_ready(tenant_id, max_block).await? {
            Some(id) => id,
            None => return Ok(None),
        };

        let job = match self.ledger.get_for_lease(id, tenant_id).await {
            Ok(job) => job,
            // Row already left `queued` (already leased, cancelled, or
            // absent): the id is discarded. Duplicates produced by the
            // scheduler are self-healing this way.
            Err(EngineError::NotQueued) | Err(EngineError::NotFound) => return Ok(None),
            Err(other) => return Err(other),
        };

        let visibility_timeout_sec =
            visibility_timeout_override.unwrap_or(job.visibility_timeout_sec);
        let lease_expires_at = Utc::now() + chrono::Duration::seconds(visibility_timeout_sec);

        let applied = self
            .ledger
            .cas(
                id,
                tenant_id,
                &[JobStatus::Queued],
                Mutation::to_status(JobStatus::Leased)
                    .with_leased_by(Some(worker_id.to_string()))
                    .with_lease_expires_at(Some(lease_expires_at)),
            )
            .await?;

        if !applied {
            // Another path (the scheduler's duplicate promotion, or a
            // racing worker) claimed it first. Self-heals: report no job.
            return Ok(None);
        }

        let mut leased = job;
        leased.status = JobStatus::Leased;
        leased.leased_by = Some(worker_id.to_string());
        leased.lease_expires_at = Some(lease_expires_at);
        leased.visibility_timeout_sec = visibility_timeout_sec;

        Ok(Some(LeasedJob::from(&leased)))
    }

    /// §4.3.3 Extend lease.
    pub async fn extend_lease(
        &self,
        tenant_id: &str,
        worker_id: &str,
        id: JobId,
        extend_by_sec: i64,
    ) -> Result<(), EngineError> {
        let extend_by_sec = if extend_by_sec > 0 {
            extend_by_sec
        } else {
            DEFAULT_EXTEND_BY_SEC
        };

        let job = self.ledger.get(id, tenant_id).await?;
        if job.status != JobStatus::Leased || job.leased_by.as_deref() != Some(worker_id) {
            return Err(EngineError::LeaseLost);
        }

        let new_expiry = Utc::now() + chrono::Duration::seconds(extend_by_sec);
        let applied = self
            .ledger
            .cas(
                id,
                tenant_id,
                &[JobStatus::Leased],
                Mutation::to_status(JobStatus::Leased)
                    .with_lease_expires_at(Some(new_expiry)),
            )
            .await?;

        if !applied {
            return Err(EngineError::LeaseLost);
        }
        Ok(())
    }

    /// §4.3.4 Complete. `failed_temp` is accepted as a source state in case
    /// a caller observes a row mid-retry-transition, though in this
    /// implementation `failed_temp` never persists (see spec §9).
    ///
    /// A `leased` row must be owned by `worker_id` (spec §8 property 3:
    /// lease safety) — checked the same way `extend_lease` does, since the
    /// `cas` predicate itself only constrains `status`, not `leased_by`.
    pub async fn complete(
        &self,
        tenant_id: &str,
        worker_id: &str,
        id: JobId,
    ) -> Result<(), EngineError> {
        let job = self.ledger.get(id, tenant_id).await?;
        if job.status == JobStatus::Leased && job.leased_by.as_deref() != Some(worker_id) {
            return Err(EngineError::NotOwned);
        }

        let applied = self
            .ledger
            .cas(
                id,
                tenant_id,
                &[JobStatus::Leased, JobStatus::FailedTemp],
                Mutation::to_status(JobStatus::Succeeded)
                    .with_leased_by(None)
                    .with_lease_expires_at(None),
            )
            .await?;

        if !applied {
            return Err(EngineError::NotOwned);
        }
        Ok(())
    }

    /// §4.3.5 Fail.
    pub async fn fail(
        &self,
        tenant_id: &str,
        _worker_id: &str,
        id: JobId,
        error: impl Into<String>,
        retryable: bool,
    ) -> Result<(), EngineError> {
        let error = error.into();
        let job = self.ledger.get(id, tenant_id).await?;

        if retryable && job.attempt + 1 < job.max_attempts {
            let delay = job.backoff_policy.delay_secs(job.attempt);
            let next_run_at = Utc::now() + chrono::Duration::seconds(delay);

            let applied = self
                .ledger
                .cas(
                    id,
                    tenant_id,
                    &[JobStatus::Leased],
                    Mutation::to_status(JobStatus::Queued)
                        .with_attempt(job.attempt + 1)
                        .with_error(Some(error))
                        .with_run_at(next_run_at)
                        .with_leased_by(None)
                        .with_lease_expires_at(None),
                )
                .await?;

            if !applied {
                return Err(EngineError::NotOwned);
            }

            // If this push fails, the row is left `queued` with a future
            // `run_at`; the scheduler's reconciliation promotes it later.
            if let Err(e) = self.broker.push_delayed(tenant_id, id, next_run_at).await {
                tracing::warn!(job_id = %id, error = %e, "push_delayed failed after retry CAS; reconciliation will repair");
            }

            return Ok(());
        }

        let applied = self
            .ledger
            .cas(
                id,
                tenant_id,
                &[JobStatus::Leased],
                Mutation::to_status(JobStatus::FailedPerm)
                    .with_error(Some(error))
                    .with_leased_by(None)
                    .with_lease_expires_at(None),
            )
            .await?;

        if !applied {
            return Err(EngineError::NotOwned);
        }
        Ok(())
    }

    pub async fn list_jobs(&self, tenant_id: &str, limit: i64) -> Result<Vec<JobView>, EngineError> {
        self.ledger.summary(tenant_id, limit).await
    }

    pub async fn get_job(&self, tenant_id: &str, id: JobId) -> Result<JobView, EngineError> {
        self.ledger.summary_one(id, tenant_id).await
    }

    pub(crate) fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub(crate) fn broker(&self) -> &Arc<B> {
        &self.broker
    }
}

/// Parse a job id from its string form, as received over the API.
pub fn parse_job_id(raw: &str) -> Result<JobId, EngineError> {
    Uuid::parse_str(raw).map_err(|_| EngineError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing_support::{InMemoryBroker, InMemoryLedger};
    use std::sync::Arc;

    fn coordinator() -> Coordinator<InMemoryLedger, InMemoryBroker> {
        Coordinator::new(Arc::new(InMemoryLedger::new()), Arc::new(InMemoryBroker::new()))
    }

    #[tokio::test]
    async fn immediate_enqueue_then_lease_then_complete() {
        let c = coordinator();
        let id = c
            .enqueue(EnqueueRequest::new(
                "t1",
                "email",
                serde_json::json!({"to": "a"}),
                60,
            ))
            .await
            .unwrap();

        let leased = c
            .lease("t1", "worker-1", None, Duration::from_millis(10))
            .await
            .unwrap()
            .expect("job should be ready immediately");
        assert_eq!(leased.id, id);
        assert_eq!(leased.attempt, 0);
        assert_eq!(leased.max_attempts, 10);

        c.complete("t1", "worker-1", id).await.unwrap();

        let again = c
            .lease("t1", "worker-1", None, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn fail_nonretryable_then_complete_returns_not_owned() {
        let c = coordinator();
        let id = c
            .enqueue(EnqueueRequest::new("t1", "x", serde_json::json!({}), 60))
            .await
            .unwrap();
        c.lease("t1", "w1", None, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        c.fail("t1", "w1", id, "boom", false).await.unwrap();

        let result = c.complete("t1", "w1", id).await;
        assert!(matches!(result, Err(EngineError::NotOwned)));
    }

    #[tokio::test]
    async fn complete_by_a_different_worker_than_the_lease_holder_is_rejected() {
        let c = coordinator();
        let id = c
            .enqueue(EnqueueRequest::new("t1", "x", serde_json::json!({}), 60))
            .await
            .unwrap();
        c.lease("t1", "worker-1", None, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        let result = c.complete("t1", "worker-2", id).await;
        assert!(matches!(result, Err(EngineError::NotOwned)));

        // the actual lease holder can still complete it afterwards.
        c.complete("t1", "worker-1", id).await.unwrap();
    }

    #[tokio::test]
    async fn extend_then_complete_within_window_succeeds() {
        let c = coordinator();
        let id = c
            .enqueue(EnqueueRequest::new("t1", "x", serde_json::json!({}), 1))
            .await
            .unwrap();
        c.lease("t1", "w1", None, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        c.extend_lease("t1", "w1", id, 60).await.unwrap();
        c.complete("t1", "w1", id).await.unwrap();
    }

    #[tokio::test]
    async fn retry_increments_attempt_and_schedules_future_run_at() {
        let c = coordinator();
        let id = c
            .enqueue(EnqueueRequest::new("t1", "x", serde_json::json!({}), 60))
            .await
            .unwrap();
        c.lease("t1", "w1", None, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();

        c.fail("t1", "w1", id, "transient", true).await.unwrap();

        let job = c.ledger().get(id, "t1").await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempt, 1);
        assert!(job.run_at > Utc::now());
    }

    #[tokio::test]
    async fn exhausting_retries_moves_to_failed_perm() {
        let c = coordinator();
        let id = c
            .enqueue(EnqueueRequest::new("t1", "x", serde_json::json!({}), 60))
            .await
            .unwrap();
        // max_attempts defaults to 10; force it down for the test via a
        // fresh ledger row with max_attempts = 1.
        let job = c.ledger().get(id, "t1").await.unwrap();
        assert_eq!(job.max_attempts, 10);

        // Drive three failures against a max_attempts = 3 job instead.
        let id2 = c
            .ledger()
            .insert(InsertParams {
                tenant_id: "t1".into(),
                job_type: "x".into(),
                payload: serde_json::json!({}),
                priority: 100,
                run_at: Utc::now(),
                dedupe_key: None,
                dedupe_ttl_sec: None,
                max_attempts: 3,
                backoff_policy: BackoffPolicy::Exponential,
                visibility_timeout_sec: 60,
            })
            .await
            .unwrap();
        c.broker().push_ready("t1", id2).await.unwrap();

        c.lease("t1", "w1", None, Duration::from_millis(10))
            .await
            .unwrap();
        c.fail("t1", "w1", id2, "e1", true).await.unwrap(); // attempt 0 -> 1
        c.broker().push_ready("t1", id2).await.unwrap();
        c.lease("t1", "w1", None, Duration::from_millis(10))
            .await
            .unwrap();
        c.fail("t1", "w1", id2, "e2", true).await.unwrap(); // attempt 1 -> 2
        c.broker().push_ready("t1", id2).await.unwrap();
        c.lease("t1", "w1", None, Duration::from_millis(10))
            .await
            .unwrap();
        c.fail("t1", "w1", id2, "e3", true).await.unwrap(); // attempt+1 == max -> failed_perm

        let job = c.ledger().get(id2, "t1").await.unwrap();
        assert_eq!(job.status, JobStatus::FailedPerm);
        assert_eq!(job.attempt, 2);
    }

    #[tokio::test]
    async fn dedupe_rejects_second_enqueue_within_ttl() {
        let c = coordinator();
        let req = |dedupe: &str| {
            let mut r = EnqueueRequest::new("t1", "order", serde_json::json!({}), 60);
            r.dedupe_key = Some(dedupe.to_string());
            r.dedupe_ttl_sec = Some(300);
            r
        };

        let first = c.enqueue(req("order-42")).await.unwrap();
        let second = c.enqueue(req("order-42")).await;

        match second {
            Err(EngineError::Duplicate { existing_id }) => assert_eq!(existing_id, first),
            other => panic!("expected Duplicate, got {other:?}"),
        }
    }
}
