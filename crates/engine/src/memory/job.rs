//! Job handle backed by the in-memory backlog.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::store::{QueueShared, Settlement};
use crate::engine::JobHandle;
use crate::error::{EngineError, JobError, ProcessingError};
use crate::types::{JobId, JobInfo, JobStatus};

pub(crate) struct MemoryJob {
    shared: Arc<QueueShared>,
    id: JobId,
    params: Value,
}

impl MemoryJob {
    pub fn new(shared: Arc<QueueShared>, id: JobId, params: Value) -> Self {
        Self { shared, id, params }
    }
}

#[async_trait]
impl JobHandle for MemoryJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn queue(&self) -> &str {
        &self.shared.name
    }

    fn params(&self) -> &Value {
        &self.params
    }

    async fn data(&self) -> Result<Option<Value>, EngineError> {
        self.shared.with_job(self.id, |r| Ok(r.data.clone()))
    }

    async fn update(&self, data: Value) -> Result<(), EngineError> {
        self.shared.with_job(self.id, |r| {
            r.data = Some(data);
            Ok(())
        })
    }

    async fn info(&self) -> Result<JobInfo, EngineError> {
        self.shared.with_job(self.id, |r| Ok(r.info(&self.shared.name)))
    }

    async fn progress(&self, value: f64) -> Result<(), EngineError> {
        self.shared.with_job(self.id, |r| {
            r.progress = value;
            Ok(())
        })
    }

    async fn get_state(&self) -> Result<JobStatus, EngineError> {
        self.shared.with_job(self.id, |r| Ok(r.status))
    }

    async fn remove(&self) -> Result<(), EngineError> {
        let mut state = self.shared.lock();
        let record = state
            .jobs
            .get(&self.id)
            .ok_or(EngineError::JobNotFound(self.id))?;

        if record.status == JobStatus::Active {
            return Err(EngineError::InvalidTransition {
                job_id: self.id,
                action: "remove",
                status: record.status,
            });
        }

        // Dropping the record closes the settlement channel for waiters.
        state.jobs.remove(&self.id);
        Ok(())
    }

    async fn retry(&self) -> Result<(), EngineError> {
        self.shared.with_job(self.id, |r| {
            if r.status != JobStatus::Failed {
                return Err(EngineError::InvalidTransition {
                    job_id: r.id,
                    action: "retry",
                    status: r.status,
                });
            }
            r.status = JobStatus::Waiting;
            r.discarded = false;
            r.finished_at = None;
            r.settled.send_replace(Settlement::Pending);
            Ok(())
        })?;

        self.shared.notify.notify_one();
        Ok(())
    }

    async fn discard(&self) -> Result<(), EngineError> {
        self.shared.with_job(self.id, |r| {
            r.discarded = true;
            Ok(())
        })
    }

    async fn promote(&self) -> Result<(), EngineError> {
        self.shared.with_job(self.id, |r| {
            if r.status != JobStatus::Delayed {
                return Err(EngineError::InvalidTransition {
                    job_id: r.id,
                    action: "promote",
                    status: r.status,
                });
            }
            r.status = JobStatus::Waiting;
            r.ready_at = None;
            Ok(())
        })?;

        self.shared.notify.notify_one();
        Ok(())
    }

    async fn finished(&self) -> Result<Value, JobError> {
        let mut rx = self.shared.with_job(self.id, |r| Ok(r.settled.subscribe()))?;

        loop {
            let current = rx.borrow_and_update().clone();
            match current {
                Settlement::Completed(value) => return Ok(value),
                Settlement::Failed(reason) => {
                    return Err(ProcessingError {
                        job_id: self.id,
                        reason,
                    }
                    .into());
                }
                Settlement::Pending => {}
            }

            if rx.changed().await.is_err() {
                // Record dropped: either removed after settling, or removed while pending.
                let last = rx.borrow().clone();
                return match last {
                    Settlement::Completed(value) => Ok(value),
                    Settlement::Failed(reason) => Err(ProcessingError {
                        job_id: self.id,
                        reason,
                    }
                    .into()),
                    Settlement::Pending => Err(EngineError::JobRemoved(self.id).into()),
                };
            }
        }
    }
}
