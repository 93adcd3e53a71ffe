//! In-memory `Ledger`/`Broker`/`LeaderLock` fakes, shared by `enq-api` and
//! `enq-server` integration tests so the full enqueue/lease/complete/fail
//! protocol and the scheduler's reconciliation sweep can be exercised
//! deterministically, without a live Postgres or Redis.
//!
//! `enq-core` keeps its own private, smaller copy of these fakes for its
//! own unit tests (see its `testing_support` module) so that crate never
//! has to depend on this one.

mod broker;
mod leader_lock;
mod ledger;

pub use broker::InMemoryBroker;
pub use leader_lock::InMemoryLeaderLock;
pub use ledger::InMemoryLedger;

#[cfg(test)]
mod tests {
    use super::*;
    use enq_core::{Coordinator, EnqueueRequest, Scheduler};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn coordinator_round_trips_against_the_public_fakes() {
        let ledger = Arc::new(InMemoryLedger::new());
        let broker = Arc::new(InMemoryBroker::new());
        let coordinator = Coordinator::new(ledger.clone(), broker.clone());

        let id = coordinator
            .enqueue(EnqueueRequest::new(
                "tenant-a",
                "send_email",
                serde_json::json!({"to": "a@example.com"}),
                30,
            ))
            .await
            .unwrap();

        let leased = coordinator
            .lease("tenant-a", "worker-1", None, Duration::from_millis(10))
            .await
            .unwrap()
            .expect("job should be ready immediately");
        assert_eq!(leased.id, id);

        coordinator.complete("tenant-a", "worker-1", id).await.unwrap();

        let view = coordinator.get_job("tenant-a", id).await.unwrap();
        assert_eq!(view.status, enq_core::JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn scheduler_skips_ticks_while_not_leader() {
        let ledger = Arc::new(InMemoryLedger::new());
        let broker = Arc::new(InMemoryBroker::new());
        let lock = Arc::new(InMemoryLeaderLock::never_leader());

        let scheduler = Scheduler::new(ledger, broker, lock);
        let report = scheduler.tick().await.unwrap();
        assert!(!report.was_leader);
    }

    #[tokio::test]
    async fn seeded_api_key_resolves_to_its_tenant() {
        let ledger = InMemoryLedger::new();
        ledger.seed_tenant("tenant-a", "hash-of-some-key");

        let resolved = enq_core::Ledger::tenant_by_api_key_hash(&ledger, "hash-of-some-key")
            .await
            .unwrap();
        assert_eq!(resolved.as_deref(), Some("tenant-a"));

        let missing = enq_core::Ledger::tenant_by_api_key_hash(&ledger, "no-such-hash")
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
