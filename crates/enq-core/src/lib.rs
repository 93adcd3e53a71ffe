//! # enq-core
//!
//! The coordination engine for a durable, multi-tenant job queue.
//!
//! ## Architecture
//!
//! ```text
//! API / worker client
//!        │
//!        ▼
//!  Coordinator<L, B>  ── enqueue/lease/extend_lease/complete/fail
//!        │        │
//!        ▼        ▼
//!     Ledger    Broker
//!   (source      (fast
//!    of truth)   ready/delay index)
//!        ▲
//!        │ reconciliation tick
//!    Scheduler + LeaderLock
//! ```
//!
//! [`Ledger`] is the authoritative, transactional store: every status
//! transition goes through [`Ledger::cas`] and nothing else. [`Broker`] is
//! a cache over it — a ready list and a delay set per tenant — that can be
//! rebuilt from the ledger at any time. [`Coordinator`] sequences the two so
//! a broker failure never produces a job with no ledger row, and a ledger
//! failure never produces a job no broker will ever serve.
//!
//! [`Scheduler`](crate::scheduler::Scheduler) runs the reconciliation sweep
//! that promotes due delayed jobs, re-announces `queued` rows the broker
//! lost track of, and recovers leases past their visibility timeout. Only
//! one scheduler replica acts per tick, gated by a
//! [`LeaderLock`](crate::scheduler::LeaderLock).
//!
//! ## What this is not
//!
//! `enq-core` is storage-agnostic: it has no Postgres or Redis client in
//! its dependency tree. Production backends live in `enq-postgres` and
//! `enq-redis`; this crate only defines the traits they implement and the
//! protocol logic built on top of them.

pub mod broker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod ledger;
pub mod scheduler;

#[cfg(test)]
mod testing_support;

pub use broker::Broker;
pub use config::EngineConfig;
pub use coordinator::{Coordinator, EnqueueRequest, DEFAULT_EXTEND_BY_SEC, DEFAULT_MAX_PAYLOAD_BYTES};
pub use error::EngineError;
pub use job::{
    BackoffPolicy, InsertParams, Job, JobDefaults, JobId, JobStatus, JobView, LeasedJob, Tenant,
};
pub use ledger::{Ledger, Mutation};
pub use scheduler::{LeaderLock, Scheduler, TickReport, PROMOTE_DUE_BATCH, RECONCILE_BATCH, RECOVER_LEASES_BATCH};

pub use coordinator::parse_job_id;

// Re-export commonly used external types, matching the teacher's own
// convention of surfacing the async trait macro its traits are built with.
pub use async_trait::async_trait;
