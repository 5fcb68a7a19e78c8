use std::time::Duration;

use axum::http::StatusCode;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use jobba_engine::{Backoff, BackoffStrategy, JobCounts, JobId, JobOptions, JobStatus};

use crate::app::errors;

/// Jobs listed per request when no `limit` is given.
pub const DEFAULT_LIST_LIMIT: usize = 100;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub options: Option<JobOptionsRequest>,
}

/// Per-job options as accepted over HTTP (durations in milliseconds).
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobOptionsRequest {
    pub delay_ms: Option<u64>,
    pub priority: Option<u32>,
    pub attempts: Option<u32>,
    pub backoff: Option<BackoffRequest>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub remove_on_complete: bool,
    #[serde(default)]
    pub remove_on_fail: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffRequest {
    #[serde(default)]
    pub strategy: BackoffStrategy,
    pub delay_ms: u64,
    pub max_delay_ms: Option<u64>,
    #[serde(default)]
    pub jitter: f64,
}

impl From<JobOptionsRequest> for JobOptions {
    fn from(req: JobOptionsRequest) -> Self {
        let mut options = JobOptions::default();
        if let Some(ms) = req.delay_ms {
            options = options.delayed(Duration::from_millis(ms));
        }
        if let Some(priority) = req.priority {
            options = options.with_priority(priority);
        }
        if let Some(attempts) = req.attempts {
            options = options.with_attempts(attempts);
        }
        if let Some(backoff) = req.backoff {
            options = options.with_backoff(backoff.into());
        }
        if let Some(ms) = req.timeout_ms {
            options = options.with_timeout(Duration::from_millis(ms));
        }
        options.remove_on_complete = req.remove_on_complete;
        options.remove_on_fail = req.remove_on_fail;
        options
    }
}

impl From<BackoffRequest> for Backoff {
    fn from(req: BackoffRequest) -> Self {
        let delay = Duration::from_millis(req.delay_ms);
        let max_delay = req.max_delay_ms.map(Duration::from_millis).unwrap_or(delay);
        let backoff = match req.strategy {
            BackoffStrategy::Fixed => Backoff::fixed(delay),
            BackoffStrategy::Exponential => Backoff::exponential(delay, max_delay),
            BackoffStrategy::Linear => Backoff::linear(delay, max_delay),
        };
        backoff.with_jitter(req.jitter)
    }
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub progress: f64,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub task: String,
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct TaskSummary {
    pub id: String,
    pub counts: JobCounts,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: JobStatus,
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_job_id(s: &str) -> Result<JobId, Response> {
    s.parse().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_job_id",
            format!("`{s}` is not a valid job id"),
        )
    })
}

pub fn parse_status(s: &str) -> Result<JobStatus, Response> {
    serde_json::from_value(Value::String(s.to_ascii_lowercase())).map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_status",
            "status must be one of: waiting, active, completed, failed, delayed",
        )
    })
}

pub fn parse_limit(s: Option<&str>) -> Result<usize, Response> {
    match s {
        None => Ok(DEFAULT_LIST_LIMIT),
        Some(raw) => raw.parse().map_err(|_| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_limit",
                "limit must be a non-negative integer",
            )
        }),
    }
}
