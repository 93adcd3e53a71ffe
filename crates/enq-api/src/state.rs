use std::sync::Arc;

use enq_core::{Broker, Coordinator, Ledger};

/// Resolved by [`crate::auth::require_tenant`] and injected into request
/// extensions; every authenticated handler extracts it with
/// `Extension<TenantId>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantId(pub String);

/// Shared state for the whole router. Generic over the storage backends so
/// the same routes serve production Postgres/Redis and the in-memory
/// fakes in tests.
pub struct AppState<L: Ledger, B: Broker> {
    pub coordinator: Arc<Coordinator<L, B>>,
    pub ledger: Arc<L>,
    pub default_visibility_timeout_sec: i64,
}

impl<L: Ledger, B: Broker> AppState<L, B> {
    pub fn new(coordinator: Arc<Coordinator<L, B>>, ledger: Arc<L>, default_visibility_timeout_sec: i64) -> Self {
        AppState {
            coordinator,
            ledger,
            default_visibility_timeout_sec,
        }
    }
}

// Hand-written rather than `#[derive(Clone)]`: a derive would require
// `L: Clone` and `B: Clone`, neither of which storage backends need to be —
// only the `Arc` wrapping them does.
impl<L: Ledger, B: Broker> Clone for AppState<L, B> {
    fn clone(&self) -> Self {
        AppState {
            coordinator: self.coordinator.clone(),
            ledger: self.ledger.clone(),
            default_visibility_timeout_sec: self.default_visibility_timeout_sec,
        }
    }
}
