//! Task registry.
//!
//! Maps task ids to engine queues. Registering a task creates (or reopens)
//! the queue named after the task and binds the task's processing function
//! to it; scheduling enqueues a job on that queue.
//!
//! ## Registration vs. scheduling
//!
//! An id becomes visible to `schedule` only once `register_task` returns.
//! Re-registering an id is not atomic with respect to concurrent scheduling:
//! a `schedule` that overlaps it may enqueue through either the old or the
//! new queue handle. Both handles name the same queue, so the job lands in
//! the same backlog; it runs under whichever processor's workers claim it,
//! and the new processor retires the old workers before they claim again.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, info, warn};

use jobba_engine::{
    JobCounts, JobId, JobInfo, JobOptions, JobStatus, Processor, QueueEngine, QueueHandle,
    QueueOptions, processor,
};

use crate::error::{RegistryResult, UnknownTaskError};
use crate::job::Job;
use crate::task::{TaskDescriptor, TaskFn};

/// Named task types bound to their processing functions.
///
/// Cheap to clone; clones share the same task table.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<dyn QueueEngine>,
    queues: RwLock<HashMap<String, Arc<dyn QueueHandle>>>,
}

impl TaskRegistry {
    pub fn new(engine: Arc<dyn QueueEngine>) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                queues: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register `f` as the processing function of task `id`.
    pub async fn register<F, Fut, R>(
        &self,
        id: impl Into<String>,
        f: F,
        options: QueueOptions,
    ) -> RegistryResult<()>
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Serialize,
    {
        self.register_task(TaskDescriptor::new(id, f).with_options(options))
            .await
    }

    /// Register a task from its descriptor.
    ///
    /// Registering an id again replaces its binding: jobs picked up from then
    /// on run the new function, and the old queue handle is dropped.
    pub async fn register_task(&self, task: TaskDescriptor) -> RegistryResult<()> {
        let TaskDescriptor {
            id,
            processor,
            options,
        } = task;

        let queue = self.inner.engine.create_queue(&id, options).await?;
        queue.process(bind(processor)).await?;

        let replaced = self
            .inner
            .queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), queue)
            .is_some();

        if replaced {
            warn!(task = %id, "task re-registered; previous processor replaced");
        } else {
            info!(task = %id, "task registered");
        }
        Ok(())
    }

    /// Enqueue a job for task `id` with `data` as its params.
    ///
    /// Fails with [`UnknownTaskError`] without touching the engine when `id`
    /// was never registered.
    pub async fn schedule<T>(
        &self,
        id: &str,
        data: T,
        options: Option<JobOptions>,
    ) -> RegistryResult<JobId>
    where
        T: Serialize,
    {
        let queue = self.queue(id)?;
        let payload = serde_json::to_value(data)?;
        let handle = queue.add(payload, options).await?;

        debug!(task = %id, job_id = %handle.id(), "job scheduled");
        Ok(handle.id())
    }

    /// Registered task ids, sorted.
    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Look up one job of task `id`, wrapped for inspection or control.
    pub async fn job(&self, id: &str, job_id: JobId) -> RegistryResult<Option<Job>> {
        let queue = self.queue(id)?;
        match queue.job(job_id).await? {
            Some(handle) => Ok(Some(Job::attach(handle).await?)),
            None => Ok(None),
        }
    }

    /// List jobs of task `id`, oldest first.
    pub async fn jobs(
        &self,
        id: &str,
        status: Option<JobStatus>,
        limit: usize,
    ) -> RegistryResult<Vec<JobInfo>> {
        let queue = self.queue(id)?;
        Ok(queue.jobs(status, limit).await?)
    }

    pub async fn counts(&self, id: &str) -> RegistryResult<JobCounts> {
        let queue = self.queue(id)?;
        Ok(queue.counts().await?)
    }

    fn queue(&self, id: &str) -> Result<Arc<dyn QueueHandle>, UnknownTaskError> {
        self.inner
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| UnknownTaskError(id.to_string()))
    }
}

/// Adapt a task function to the engine: every attempt gets a fresh [`Job`]
/// around the engine handle.
fn bind(task: TaskFn) -> Processor {
    processor(move |handle| {
        let task = task.clone();
        async move {
            let job = Job::attach(handle).await?;
            task(job).await
        }
    })
}
