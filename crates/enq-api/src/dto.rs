//! Wire DTOs for the `/v1/*` routes. Kept deliberately separate from
//! `enq_core::Job` and friends: the wire format is camelCase and a strict
//! subset/reshaping of the domain model, and should be free to diverge
//! from it without touching the engine.

use chrono::{DateTime, Utc};
use enq_core::{JobId, JobView, LeasedJob};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueReq {
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: serde_json::Value,
    pub run_at: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
    pub dedupe_key: Option<String>,
    pub dedupe_ttl_sec: Option<i64>,
    pub max_attempts: Option<i32>,
    pub backoff_policy: Option<String>,
    pub visibility_timeout_sec: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResp {
    pub id: JobId,
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseReq {
    pub worker_id: String,
    #[serde(default)]
    pub visibility_timeout_sec: Option<i64>,
    /// How long the server may hold the request open waiting for a ready
    /// job before answering `{job: null}`.
    #[serde(default)]
    pub max_wait_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct LeaseResp {
    pub job: Option<LeasedJobDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeasedJobDto {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: serde_json::Value,
    pub attempt: i32,
    pub max_attempts: i32,
    pub lease_expires_at: DateTime<Utc>,
    pub visibility_timeout_sec: i64,
}

impl From<LeasedJob> for LeasedJobDto {
    fn from(job: LeasedJob) -> Self {
        LeasedJobDto {
            id: job.id,
            job_type: job.job_type,
            payload: job.payload,
            attempt: job.attempt,
            max_attempts: job.max_attempts,
            lease_expires_at: job.lease_expires_at,
            visibility_timeout_sec: job.visibility_timeout_sec,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendReq {
    pub worker_id: String,
    #[serde(default)]
    pub extend_by_sec: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteReq {
    pub worker_id: String,
    pub job_id: JobId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailReq {
    pub worker_id: String,
    pub job_id: JobId,
    pub error: String,
    pub retryable: bool,
}

#[derive(Debug, Serialize)]
pub struct JobsResp {
    pub jobs: Vec<JobViewDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobViewDto {
    pub id: JobId,
    pub tenant_id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub priority: i32,
    pub run_at: DateTime<Utc>,
    pub attempt: i32,
    pub max_attempts: i32,
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JobView> for JobViewDto {
    fn from(job: JobView) -> Self {
        JobViewDto {
            id: job.id,
            tenant_id: job.tenant_id,
            job_type: job.job_type,
            priority: job.priority,
            run_at: job.run_at,
            attempt: job.attempt,
            max_attempts: job.max_attempts,
            status: job.status.to_string(),
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResp {
    pub ok: bool,
}
