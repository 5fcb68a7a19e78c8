//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

/// Job status as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be picked up
    Waiting,
    /// Currently being processed by a worker
    Active,
    /// Processing function returned successfully
    Completed,
    /// Attempts exhausted (or discarded) after a failure
    Failed,
    /// Scheduled for later (initial delay or retry backoff)
    Delayed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Delayed => "delayed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential
    }
}

/// Delay applied before a failed job is retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub strategy: BackoffStrategy,
    /// Base delay between retries
    pub delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
        }
    }
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            delay,
            max_delay: delay,
            jitter: 0.0,
        }
    }

    pub fn exponential(delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            delay,
            max_delay,
            jitter: 0.0,
        }
    }

    pub fn linear(delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Linear,
            delay,
            max_delay,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis().max(self.delay.as_millis()) as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((attempt - 1) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        };

        // Deterministic jitter derived from the attempt number.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }
}

/// Per-job options passed when a job is added to a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Wait this long before the job becomes eligible for processing
    pub delay: Option<Duration>,
    /// Lower values are processed first; unset sorts as 0
    pub priority: Option<u32>,
    /// Total number of tries, including the first one
    pub attempts: u32,
    /// Delay between retries; retries are immediate when unset
    pub backoff: Option<Backoff>,
    /// Fail an attempt that runs longer than this
    pub timeout: Option<Duration>,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            delay: None,
            priority: None,
            attempts: 1,
            backoff: None,
            timeout: None,
            remove_on_complete: false,
            remove_on_fail: false,
        }
    }
}

impl JobOptions {
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn remove_on_complete(mut self) -> Self {
        self.remove_on_complete = true;
        self
    }

    pub fn remove_on_fail(mut self) -> Self {
        self.remove_on_fail = true;
        self
    }
}

/// Caps how many jobs a queue may start within a time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max: u32,
    pub duration: Duration,
}

/// Per-queue options passed when a queue is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Number of jobs processed concurrently
    pub concurrency: usize,
    pub limiter: Option<RateLimit>,
    /// Used by `add` when the caller passes no options
    pub default_job_options: JobOptions,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            limiter: None,
            default_job_options: JobOptions::default(),
        }
    }
}

impl QueueOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_limiter(mut self, max: u32, duration: Duration) -> Self {
        self.limiter = Some(RateLimit { max, duration });
        self
    }

    pub fn with_default_job_options(mut self, options: JobOptions) -> Self {
        self.default_job_options = options;
        self
    }
}

/// Read-only engine view of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub queue: String,
    /// Payload the job was scheduled with
    pub params: serde_json::Value,
    /// Last payload written with `update`
    pub data: Option<serde_json::Value>,
    pub progress: f64,
    pub status: JobStatus,
    pub attempts_made: u32,
    pub failed_reason: Option<String>,
    pub return_value: Option<serde_json::Value>,
    pub discarded: bool,
    pub options: JobOptions,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Number of jobs per status in a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

impl JobCounts {
    pub(crate) fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Waiting => self.waiting += 1,
            JobStatus::Active => self.active += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Delayed => self.delayed += 1,
        }
    }
}
