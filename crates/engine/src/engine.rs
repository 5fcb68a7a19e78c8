//! Queue Engine boundary.
//!
//! These traits are the only capabilities the orchestration layer consumes
//! from a queue engine. Implementations own persistence, worker dispatch and
//! retry handling.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{EngineError, JobError};
use crate::types::{JobCounts, JobId, JobInfo, JobOptions, JobStatus, QueueOptions};

/// Boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Processing function bound to a queue.
///
/// Invoked once per job attempt with the engine-native job handle. The
/// returned value becomes the job's return value; an error fails the attempt.
pub type Processor =
    Arc<dyn Fn(Arc<dyn JobHandle>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Build a [`Processor`] from an async closure.
pub fn processor<F, Fut>(f: F) -> Processor
where
    F: Fn(Arc<dyn JobHandle>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(
        move |job: Arc<dyn JobHandle>| -> BoxFuture<'static, anyhow::Result<Value>> {
            Box::pin(f(job))
        },
    )
}

/// Entry point of a queue engine.
#[async_trait]
pub trait QueueEngine: Send + Sync {
    /// Create (or open) the queue named `name`.
    ///
    /// Queues are identified by name: jobs already persisted under `name`
    /// belong to the returned handle as well.
    async fn create_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<Arc<dyn QueueHandle>, EngineError>;
}

/// One named queue.
#[async_trait]
pub trait QueueHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Bind `processor` as the sole processor of this queue and start
    /// processing, including any backlog already persisted.
    async fn process(&self, processor: Processor) -> Result<(), EngineError>;

    /// Enqueue a job. `None` uses the queue's default job options.
    async fn add(
        &self,
        payload: Value,
        options: Option<JobOptions>,
    ) -> Result<Arc<dyn JobHandle>, EngineError>;

    /// Look up a job by id.
    async fn job(&self, id: JobId) -> Result<Option<Arc<dyn JobHandle>>, EngineError>;

    /// List jobs, oldest first, optionally filtered by status.
    async fn jobs(&self, status: Option<JobStatus>, limit: usize)
    -> Result<Vec<JobInfo>, EngineError>;

    async fn counts(&self) -> Result<JobCounts, EngineError>;
}

/// Engine-native handle to one job.
#[async_trait]
pub trait JobHandle: Send + Sync {
    fn id(&self) -> JobId;

    /// Name of the queue the job belongs to.
    fn queue(&self) -> &str;

    /// Payload the job was added with.
    fn params(&self) -> &Value;

    /// Last payload persisted with [`JobHandle::update`], if any.
    async fn data(&self) -> Result<Option<Value>, EngineError>;

    /// Replace the persisted payload atomically.
    async fn update(&self, data: Value) -> Result<(), EngineError>;

    async fn info(&self) -> Result<JobInfo, EngineError>;

    async fn progress(&self, value: f64) -> Result<(), EngineError>;

    async fn get_state(&self) -> Result<JobStatus, EngineError>;

    async fn remove(&self) -> Result<(), EngineError>;

    async fn retry(&self) -> Result<(), EngineError>;

    /// Prevent any further retries of this job.
    async fn discard(&self) -> Result<(), EngineError>;

    /// Move a delayed job to the waiting list right away.
    async fn promote(&self) -> Result<(), EngineError>;

    /// Wait until processing completes; no timeout.
    async fn finished(&self) -> Result<Value, JobError>;
}
