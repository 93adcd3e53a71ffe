//! Engine-level defaults shared by every binary that builds a
//! [`Coordinator`](crate::coordinator::Coordinator) or
//! [`Scheduler`](crate::scheduler::Scheduler).
//!
//! This is deliberately small: the full environment-variable surface
//! (`APP_ENV`, `POSTGRES_DSN`, `REDIS_ADDR`, ...) belongs to the server
//! binaries that actually read the process environment. `EngineConfig` only
//! carries the handful of numeric defaults the engine itself falls back to
//! when a caller doesn't override them.

use std::time::Duration;

/// Numeric defaults for the coordination engine, independent of any
/// storage backend or transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Applied to a job when its `EnqueueReq` omits `visibilityTimeoutSec`.
    pub default_visibility_timeout_sec: i64,
    /// How often the scheduler runs its reconciliation sweep.
    pub scheduler_tick: Duration,
}

impl EngineConfig {
    pub const DEFAULT_VISIBILITY_TIMEOUT_SEC: i64 = 60;
    pub const DEFAULT_SCHEDULER_TICK: Duration = Duration::from_secs(1);
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_visibility_timeout_sec: Self::DEFAULT_VISIBILITY_TIMEOUT_SEC,
            scheduler_tick: Self::DEFAULT_SCHEDULER_TICK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.default_visibility_timeout_sec, 60);
        assert_eq!(cfg.scheduler_tick, Duration::from_secs(1));
    }
}
