use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use enq_core::{EngineError, LeaderLock};

/// A [`LeaderLock`] whose answer is fixed (or toggled directly by a test),
/// for exercising [`Scheduler`](enq_core::Scheduler) leadership handling
/// without two real Postgres connections racing `pg_try_advisory_lock`.
pub struct InMemoryLeaderLock {
    held: AtomicBool,
}

impl InMemoryLeaderLock {
    pub fn always_leader() -> Self {
        InMemoryLeaderLock {
            held: AtomicBool::new(true),
        }
    }

    pub fn never_leader() -> Self {
        InMemoryLeaderLock {
            held: AtomicBool::new(false),
        }
    }

    pub fn set(&self, is_leader: bool) {
        self.held.store(is_leader, Ordering::SeqCst);
    }
}

#[async_trait]
impl LeaderLock for InMemoryLeaderLock {
    async fn try_acquire(&self) -> Result<bool, EngineError> {
        Ok(self.held.load(Ordering::SeqCst))
    }
}
