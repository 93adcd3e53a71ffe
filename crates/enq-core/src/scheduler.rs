//! The reconciliation scheduler (spec §4.3.6).
//!
//! A single instance at any time runs this sweep every tick: promote due
//! delayed jobs, push due-queued rows the broker may have lost track of,
//! and recover leases past their `lease_expires_at`. Leadership is
//! enforced by a [`LeaderLock`], implemented against a process-advisory
//! lock in `enq-postgres` and against an in-memory flag in `enq-testing`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::broker::Broker;
use crate::error::EngineError;
use crate::job::JobStatus;
use crate::ledger::{Ledger, Mutation};

/// Batch sizes carried over from the source system (spec §5, §9): not
/// derived from measured throughput, just named constants so a tick stays
/// under roughly one second at steady state.
pub const PROMOTE_DUE_BATCH: i64 = 200;
pub const RECONCILE_BATCH: i64 = 500;
pub const RECOVER_LEASES_BATCH: i64 = 500;

/// A process-advisory lock granting exclusive rights to run reconciliation.
/// Scheduler replicas that fail to acquire it are hot standbys that skip
/// the tick (spec §5).
#[async_trait]
pub trait LeaderLock: Send + Sync {
    /// Attempt to acquire leadership for this tick. `true` if acquired (or
    /// already held by this instance).
    async fn try_acquire(&self) -> Result<bool, EngineError>;
}

/// Outcome of one reconciliation tick, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub was_leader: bool,
    pub promoted: u64,
    pub reconciled: u64,
    pub recovered: u64,
}

pub struct Scheduler<L: Ledger, B: Broker, Lock: LeaderLock> {
    ledger: Arc<L>,
    broker: Arc<B>,
    lock: Arc<Lock>,
}

impl<L: Ledger, B: Broker, Lock: LeaderLock> Scheduler<L, B, Lock> {
    pub fn new(ledger: Arc<L>, broker: Arc<B>, lock: Arc<Lock>) -> Self {
        Scheduler { ledger, broker, lock }
    }

    /// Run one reconciliation tick (spec §4.3.6, steps 1-4).
    pub async fn tick(&self) -> Result<TickReport, EngineError> {
        if !self.lock.try_acquire().await? {
            return Ok(TickReport::default());
        }

        let tenants = self.ledger.list_active_tenants().await?;
        let now = Utc::now();

        let mut report = TickReport {
            was_leader: true,
            ..Default::default()
        };

        for tenant_id in &tenants {
            report.promoted += self
                .broker
                .promote_due(tenant_id, now, PROMOTE_DUE_BATCH)
                .await?;

            let due_ids = self
                .ledger
                .list_due_queued(tenant_id, RECONCILE_BATCH)
                .await?;
            if !due_ids.is_empty() {
                self.broker.push_ready_many(tenant_id, &due_ids).await?;
                report.reconciled += due_ids.len() as u64;
            }
        }

        for tenant_id in &tenants {
            let expired = self
                .ledger
                .list_expired_leases(tenant_id, RECOVER_LEASES_BATCH)
                .await?;
            if expired.is_empty() {
                continue;
            }

            let mut recovered_ids = Vec::with_capacity(expired.len());
            for id in &expired {
                let applied = self
                    .ledger
                    .cas(
                        *id,
                        tenant_id,
                        &[JobStatus::Leased],
                        Mutation::to_status(JobStatus::Queued)
                            .with_leased_by(None)
                            .with_lease_expires_at(None),
                    )
                    .await?;
                // Reconciliation never downgrades a lease that has not
                // actually expired; a CAS miss here just means another
                // path already recovered it, which is fine to skip.
                if applied {
                    recovered_ids.push(*id);
                }
            }

            if !recovered_ids.is_empty() {
                self.broker.push_ready_many(tenant_id, &recovered_ids).await?;
                report.recovered += recovered_ids.len() as u64;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{Coordinator, EnqueueRequest};
    use crate::testing_support::{InMemoryBroker, InMemoryLedger};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct AlwaysLeader;
    #[async_trait]
    impl LeaderLock for AlwaysLeader {
        async fn try_acquire(&self) -> Result<bool, EngineError> {
            Ok(true)
        }
    }

    struct ToggleLock(AtomicBool);
    #[async_trait]
    impl LeaderLock for ToggleLock {
        async fn try_acquire(&self) -> Result<bool, EngineError> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    #[tokio::test]
    async fn skips_tick_when_not_leader() {
        let ledger = Arc::new(InMemoryLedger::new());
        let broker = Arc::new(InMemoryBroker::new());
        let lock = Arc::new(ToggleLock(AtomicBool::new(false)));
        let scheduler = Scheduler::new(ledger, broker, lock);

        let report = scheduler.tick().await.unwrap();
        assert!(!report.was_leader);
        assert_eq!(report, TickReport::default());
    }

    #[tokio::test]
    async fn recovers_expired_lease_and_makes_it_re_leasable() {
        let ledger = Arc::new(InMemoryLedger::new());
        let broker = Arc::new(InMemoryBroker::new());
        let coordinator = Coordinator::new(ledger.clone(), broker.clone());

        let id = coordinator
            .enqueue(EnqueueRequest::new(
                "t1",
                "x",
                serde_json::json!({}),
                /* visibility_timeout_sec = */ 0,
            ))
            .await
            .unwrap();

        coordinator
            .lease("t1", "worker-1", Some(0), Duration::from_millis(10))
            .await
            .unwrap()
            .expect("job should be immediately ready");

        // lease_expires_at is already in the past since visibility
        // timeout was 0; give it a moment to be strictly `< now`.
        tokio::time::sleep(Duration::from_millis(5)).await;

        let lock = Arc::new(AlwaysLeader);
        let scheduler = Scheduler::new(ledger.clone(), broker.clone(), lock);
        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.recovered, 1);

        let relea = coordinator
            .lease("t1", "worker-2", None, Duration::from_millis(10))
            .await
            .unwrap()
            .expect("recovered job should be leasable again");
        assert_eq!(relea.id, id);
        assert_eq!(relea.attempt, 0, "recovery does not touch attempt count");

        let complete_by_first = coordinator.complete("t1", "worker-1", id).await;
        assert!(matches!(complete_by_first, Err(EngineError::NotOwned)));
    }

    #[tokio::test]
    async fn promotes_due_delayed_job_into_ready_list() {
        let ledger = Arc::new(InMemoryLedger::new());
        let broker = Arc::new(InMemoryBroker::new());
        let coordinator = Coordinator::new(ledger.clone(), broker.clone());

        let mut req = EnqueueRequest::new("t1", "x", serde_json::json!({}), 60);
        req.run_at = Utc::now() - chrono::Duration::seconds(1);
        // Force the delayed path even though run_at is already due, by
        // enqueuing then manually re-pushing to the delay set the way the
        // broker would hold a job whose run_at had not yet elapsed.
        let id = coordinator.enqueue(req).await.unwrap();

        assert!(coordinator
            .lease("t1", "w1", None, Duration::from_millis(10))
            .await
            .unwrap()
            .is_some());
        coordinator.complete("t1", "w1", id).await.unwrap();

        let mut req2 = EnqueueRequest::new("t1", "x", serde_json::json!({}), 60);
        req2.run_at = Utc::now() + chrono::Duration::milliseconds(10);
        let id2 = coordinator.enqueue(req2).await.unwrap();

        assert!(coordinator
            .lease("t1", "w1", None, Duration::from_millis(5))
            .await
            .unwrap()
            .is_none());

        tokio::time::sleep(Duration::from_millis(20)).await;

        let lock = Arc::new(AlwaysLeader);
        let scheduler = Scheduler::new(ledger, broker, lock);
        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.promoted, 1);

        let leased = coordinator
            .lease("t1", "w1", None, Duration::from_millis(10))
            .await
            .unwrap()
            .expect("promoted job should now be ready");
        assert_eq!(leased.id, id2);
    }
}
