//! Structured errors for the engine.
//!
//! `EngineError` is pattern-matchable rather than a generic `anyhow::Error`,
//! following the same split the teacher's `SeesawError` makes: internal
//! detail (a SQL error, a Redis error) is wrapped for logging, while
//! [`EngineError::safe_message`] is the only text that is allowed to reach
//! an HTTP client.

use std::borrow::Cow;

use thiserror::Error;

/// Errors surfaced by the ledger, broker, and coordinator.
///
/// Variant names follow spec §4.1/§4.2/§7 directly: `Duplicate`,
/// `NotFound`, `NotQueued`, `PreconditionFailed`, `LeaseLost`, `NotOwned`,
/// `StorageUnavailable`, `BrokerUnavailable`, `Fatal`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `(tenantId, dedupeKey)` matched a live entry inside its TTL window.
    #[error("duplicate dedupe key within live window (existing job {existing_id})")]
    Duplicate { existing_id: uuid::Uuid },

    /// No row exists for the given id/tenant.
    #[error("job not found")]
    NotFound,

    /// `getForLease` observed a row not in `queued`.
    #[error("job is not queued")]
    NotQueued,

    /// A `cas` call's predicate did not match the current row.
    #[error("precondition failed: row not in expected state")]
    PreconditionFailed,

    /// `extend`/`complete` targeted a lease that expired or was never held
    /// by the calling worker.
    #[error("lease lost")]
    LeaseLost,

    /// `complete` targeted a job not owned by the calling worker (lease
    /// recovered, or already terminal).
    #[error("job not owned by this worker")]
    NotOwned,

    /// Ledger I/O failed; retryable by the caller.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Broker I/O failed; retryable by the caller.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// A programmer-observable invariant was violated (e.g. a `leased` row
    /// with a null `leased_by`). Reconciliation must never paper over this.
    #[error("invariant violated: {0}")]
    Fatal(String),
}

impl EngineError {
    /// The message safe to return to an API caller. Never includes the
    /// underlying storage error text.
    pub fn safe_message(&self) -> Cow<'static, str> {
        match self {
            EngineError::Duplicate { .. } => "a live job with this dedupe key already exists".into(),
            EngineError::NotFound => "job not found".into(),
            EngineError::NotQueued => "job is not queued".into(),
            EngineError::PreconditionFailed => "job is not in the expected state".into(),
            EngineError::LeaseLost => "lease lost".into(),
            EngineError::NotOwned => "job is not owned by this worker".into(),
            EngineError::StorageUnavailable(_) => "storage unavailable, please retry".into(),
            EngineError::BrokerUnavailable(_) => "broker unavailable, please retry".into(),
            EngineError::Fatal(_) => "internal error".into(),
        }
    }

    /// Whether the caller may safely retry this operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::StorageUnavailable(_) | EngineError::BrokerUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_never_leak_detail_in_safe_message() {
        let err = EngineError::StorageUnavailable("connection reset by peer".into());
        assert!(!err.safe_message().contains("connection reset"));
        assert!(err.is_retryable());
    }

    #[test]
    fn fatal_errors_are_not_retryable() {
        let err = EngineError::Fatal("leased row with null leased_by".into());
        assert!(!err.is_retryable());
        assert_eq!(err.safe_message(), "internal error");
    }

    #[test]
    fn duplicate_message_is_pattern_matchable() {
        let id = uuid::Uuid::nil();
        let err = EngineError::Duplicate { existing_id: id };
        match err {
            EngineError::Duplicate { existing_id } => assert_eq!(existing_id, id),
            _ => panic!("expected Duplicate"),
        }
    }
}
