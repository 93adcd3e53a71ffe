//! The job data model: [`Job`], its lifecycle [`JobStatus`], and the policy
//! knobs attached to a job (priority, backoff, visibility timeout, dedupe).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque job identifier. Assigned by the ledger at insert time.
pub type JobId = Uuid;

/// Lifecycle state of a job row.
///
/// `Succeeded`, `FailedPerm`, and `DeadLettered` are terminal: no
/// transition leaves them. `FailedTemp` is never observed at rest — see
/// [`Coordinator::fail`](crate::coordinator::Coordinator::fail), which folds
/// it into `Queued` with a future `run_at` inside a single transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Leased,
    Succeeded,
    FailedTemp,
    FailedPerm,
    DeadLettered,
}

impl JobStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::FailedPerm | JobStatus::DeadLettered
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Leased => "leased",
            JobStatus::Succeeded => "succeeded",
            JobStatus::FailedTemp => "failed_temp",
            JobStatus::FailedPerm => "failed_perm",
            JobStatus::DeadLettered => "dead_lettered",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "queued" => JobStatus::Queued,
            "leased" => JobStatus::Leased,
            "succeeded" => JobStatus::Succeeded,
            "failed_temp" => JobStatus::FailedTemp,
            "failed_perm" => JobStatus::FailedPerm,
            "dead_lettered" => JobStatus::DeadLettered,
            other => return Err(format!("unknown job status: {other}")),
        })
    }
}

/// Retry delay policy. `base = 30s`, clamped to a 1 hour ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffPolicy {
    Exponential,
    Fixed,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential
    }
}

impl BackoffPolicy {
    const BASE_SECS: i64 = 30;
    const MAX_SECS: i64 = 3600;

    /// Delay before the next attempt, given the attempt count *before*
    /// incrementing (0 on the first failure).
    pub fn delay_secs(self, attempt: i32) -> i64 {
        match self {
            BackoffPolicy::Fixed => Self::BASE_SECS,
            BackoffPolicy::Exponential => {
                // `1i64 << attempt` overflows past ~62 shifts; attempt is
                // bounded by max_attempts in practice, but clamp defensively
                // rather than trust that bound here.
                let shift = attempt.clamp(0, 61) as u32;
                Self::BASE_SECS.saturating_mul(1i64 << shift).min(Self::MAX_SECS)
            }
        }
    }
}

impl std::fmt::Display for BackoffPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackoffPolicy::Exponential => write!(f, "exponential"),
            BackoffPolicy::Fixed => write!(f, "fixed"),
        }
    }
}

impl std::str::FromStr for BackoffPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "exponential" => BackoffPolicy::Exponential,
            "fixed" => BackoffPolicy::Fixed,
            other => return Err(format!("unknown backoff policy: {other}")),
        })
    }
}

/// The central entity: one unit of durable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub tenant_id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub run_at: DateTime<Utc>,
    pub dedupe_key: Option<String>,
    pub dedupe_ttl_sec: Option<i64>,
    pub attempt: i32,
    pub max_attempts: i32,
    pub backoff_policy: BackoffPolicy,
    pub visibility_timeout_sec: i64,
    pub status: JobStatus,
    pub leased_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Invariant from spec §3: `(status = leased) ⇔ (leasedBy, leaseExpiresAt both set)`.
    pub fn lease_fields_consistent(&self) -> bool {
        match self.status {
            JobStatus::Leased => self.leased_by.is_some() && self.lease_expires_at.is_some(),
            _ => self.leased_by.is_none() && self.lease_expires_at.is_none(),
        }
    }
}

/// Parameters for inserting a new job, as accepted by [`Ledger::insert`](crate::ledger::Ledger::insert).
#[derive(Debug, Clone)]
pub struct InsertParams {
    pub tenant_id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub run_at: DateTime<Utc>,
    pub dedupe_key: Option<String>,
    pub dedupe_ttl_sec: Option<i64>,
    pub max_attempts: i32,
    pub backoff_policy: BackoffPolicy,
    pub visibility_timeout_sec: i64,
}

/// Default policy values applied when an `EnqueueReq` omits a field.
/// Mirrors the defaults table in spec §6.
pub struct JobDefaults;

impl JobDefaults {
    pub const PRIORITY: i32 = 100;
    pub const MAX_ATTEMPTS: i32 = 10;
    pub const BACKOFF_POLICY: BackoffPolicy = BackoffPolicy::Exponential;
}

/// A job projected for a worker that just leased it. Returned by
/// [`Coordinator::lease`](crate::coordinator::Coordinator::lease) and serialized
/// as the API's `LeasedJob` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeasedJob {
    pub id: JobId,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub attempt: i32,
    pub max_attempts: i32,
    pub lease_expires_at: DateTime<Utc>,
    pub visibility_timeout_sec: i64,
}

impl From<&Job> for LeasedJob {
    fn from(job: &Job) -> Self {
        LeasedJob {
            id: job.id,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            attempt: job.attempt,
            max_attempts: job.max_attempts,
            lease_expires_at: job
                .lease_expires_at
                .expect("leased job must carry lease_expires_at"),
            visibility_timeout_sec: job.visibility_timeout_sec,
        }
    }
}

/// Read-only projection used for the API's job listing. A strict subset of
/// `Job` — never includes the payload, which may be large or sensitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub tenant_id: String,
    pub job_type: String,
    pub priority: i32,
    pub run_at: DateTime<Utc>,
    pub attempt: i32,
    pub max_attempts: i32,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        JobView {
            id: job.id,
            tenant_id: job.tenant_id.clone(),
            job_type: job.job_type.clone(),
            priority: job.priority,
            run_at: job.run_at,
            attempt: job.attempt,
            max_attempts: job.max_attempts,
            status: job.status,
            error: job.error.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Isolation boundary: every ledger/broker key is scoped by tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub api_key_hash: String,
}
