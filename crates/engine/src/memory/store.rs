//! Per-queue backlog shared by queue handles, job handles and workers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::types::{JobCounts, JobId, JobInfo, JobOptions, JobStatus, RateLimit};

/// Final outcome of a job, observed by `finished` waiters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Settlement {
    Pending,
    Completed(Value),
    Failed(String),
}

/// Stored job.
#[derive(Debug)]
pub(crate) struct JobRecord {
    pub id: JobId,
    pub seq: u64,
    pub params: Value,
    pub data: Option<Value>,
    pub progress: f64,
    pub status: JobStatus,
    pub options: JobOptions,
    pub attempts_made: u32,
    pub failed_reason: Option<String>,
    pub return_value: Option<Value>,
    pub discarded: bool,
    pub created_at: chrono::DateTime<Utc>,
    pub processed_at: Option<chrono::DateTime<Utc>>,
    pub finished_at: Option<chrono::DateTime<Utc>>,
    /// When a delayed job becomes eligible
    pub ready_at: Option<Instant>,
    pub settled: watch::Sender<Settlement>,
}

impl JobRecord {
    pub fn info(&self, queue: &str) -> JobInfo {
        JobInfo {
            id: self.id,
            queue: queue.to_string(),
            params: self.params.clone(),
            data: self.data.clone(),
            progress: self.progress,
            status: self.status,
            attempts_made: self.attempts_made,
            failed_reason: self.failed_reason.clone(),
            return_value: self.return_value.clone(),
            discarded: self.discarded,
            options: self.options.clone(),
            created_at: self.created_at,
            processed_at: self.processed_at,
            finished_at: self.finished_at,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub jobs: HashMap<JobId, JobRecord>,
    next_seq: u64,
    /// Start times of recently claimed jobs (rate limiting)
    window: VecDeque<Instant>,
    /// Bumped by every `process` call; workers of older generations retire.
    generation: u64,
}

/// A job claimed by a worker.
#[derive(Debug)]
pub(crate) struct Claimed {
    pub id: JobId,
    pub params: Value,
    pub timeout: Option<Duration>,
}

/// The worker's generation was superseded by a later `process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Retired;

/// Backlog of one named queue.
#[derive(Debug)]
pub(crate) struct QueueShared {
    pub name: String,
    state: Mutex<QueueState>,
    /// Wakes idle workers when work becomes available.
    pub notify: Notify,
}

impl QueueShared {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new worker generation and return it.
    pub fn next_generation(&self) -> u64 {
        let mut state = self.lock();
        state.generation += 1;
        state.generation
    }

    /// Run `f` against an existing job record.
    pub fn with_job<T>(
        &self,
        id: JobId,
        f: impl FnOnce(&mut JobRecord) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut state = self.lock();
        let record = state.jobs.get_mut(&id).ok_or(EngineError::JobNotFound(id))?;
        f(record)
    }

    pub fn insert(&self, params: Value, mut options: JobOptions) -> JobId {
        options.attempts = options.attempts.max(1);

        let id = JobId::new();
        let (status, ready_at) = match options.delay {
            Some(delay) if !delay.is_zero() => (JobStatus::Delayed, Some(Instant::now() + delay)),
            _ => (JobStatus::Waiting, None),
        };

        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(
            id,
            JobRecord {
                id,
                seq,
                params,
                data: None,
                progress: 0.0,
                status,
                options,
                attempts_made: 0,
                failed_reason: None,
                return_value: None,
                discarded: false,
                created_at: Utc::now(),
                processed_at: None,
                finished_at: None,
                ready_at,
                settled: watch::Sender::new(Settlement::Pending),
            },
        );
        drop(state);

        debug!(queue = %self.name, job_id = %id, ?status, "job added");
        self.notify.notify_one();
        id
    }

    /// Claim the next job that is ready to run.
    ///
    /// Ready delayed jobs are promoted first; among waiting jobs the lowest
    /// priority wins, then insertion order. A worker whose `generation` is no
    /// longer current gets [`Retired`] and claims nothing.
    pub fn claim(
        &self,
        generation: u64,
        limiter: Option<&RateLimit>,
    ) -> Result<Option<Claimed>, Retired> {
        let mut state = self.lock();
        if state.generation != generation {
            return Err(Retired);
        }
        let now = Instant::now();

        for record in state.jobs.values_mut() {
            if record.status == JobStatus::Delayed && record.ready_at.is_none_or(|at| at <= now) {
                record.status = JobStatus::Waiting;
                record.ready_at = None;
            }
        }

        if let Some(limit) = limiter {
            while state
                .window
                .front()
                .is_some_and(|started| now.duration_since(*started) >= limit.duration)
            {
                state.window.pop_front();
            }
            if state.window.len() >= limit.max as usize {
                return Ok(None);
            }
        }

        let Some(id) = state
            .jobs
            .values()
            .filter(|r| r.status == JobStatus::Waiting)
            .min_by_key(|r| (r.options.priority.unwrap_or(0), r.seq))
            .map(|r| r.id)
        else {
            return Ok(None);
        };

        if limiter.is_some() {
            state.window.push_back(now);
        }

        let Some(record) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        record.status = JobStatus::Active;
        record.attempts_made += 1;
        record.processed_at = Some(Utc::now());

        Ok(Some(Claimed {
            id,
            params: record.params.clone(),
            timeout: record.options.timeout,
        }))
    }

    /// Record a successful attempt.
    pub fn complete(&self, id: JobId, value: Value) {
        let mut state = self.lock();
        let Some(record) = state.jobs.get_mut(&id) else {
            warn!(queue = %self.name, job_id = %id, "completed job no longer exists");
            return;
        };

        record.status = JobStatus::Completed;
        record.return_value = Some(value.clone());
        record.failed_reason = None;
        record.finished_at = Some(Utc::now());
        record.settled.send_replace(Settlement::Completed(value));

        if record.options.remove_on_complete {
            state.jobs.remove(&id);
        }
        debug!(queue = %self.name, job_id = %id, "job completed");
    }

    /// Record a failed attempt: schedule a retry or fail the job for good.
    pub fn fail(&self, id: JobId, reason: String) {
        let mut state = self.lock();
        let Some(record) = state.jobs.get_mut(&id) else {
            warn!(queue = %self.name, job_id = %id, "failed job no longer exists");
            return;
        };

        record.failed_reason = Some(reason.clone());

        if !record.discarded && record.attempts_made < record.options.attempts {
            match record.options.backoff.as_ref() {
                Some(backoff) => {
                    let delay = backoff.delay_for_attempt(record.attempts_made);
                    record.status = JobStatus::Delayed;
                    record.ready_at = Some(Instant::now() + delay);
                }
                None => record.status = JobStatus::Waiting,
            }
            debug!(
                queue = %self.name,
                job_id = %id,
                attempt = record.attempts_made,
                error = %reason,
                "job attempt failed, retrying"
            );
            drop(state);
            self.notify.notify_one();
            return;
        }

        record.status = JobStatus::Failed;
        record.finished_at = Some(Utc::now());
        record.settled.send_replace(Settlement::Failed(reason.clone()));
        warn!(
            queue = %self.name,
            job_id = %id,
            attempts = record.attempts_made,
            error = %reason,
            "job failed"
        );

        if record.options.remove_on_fail {
            state.jobs.remove(&id);
        }
    }

    pub fn list(&self, status: Option<JobStatus>, limit: usize) -> Vec<JobInfo> {
        let state = self.lock();
        let mut records: Vec<_> = state
            .jobs
            .values()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .collect();
        records.sort_by_key(|r| r.seq);
        records
            .into_iter()
            .take(limit)
            .map(|r| r.info(&self.name))
            .collect()
    }

    pub fn counts(&self) -> JobCounts {
        let state = self.lock();
        let mut counts = JobCounts::default();
        for record in state.jobs.values() {
            counts.record(record.status);
        }
        counts
    }
}
