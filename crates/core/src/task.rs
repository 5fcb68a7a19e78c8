//! Task descriptors.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use jobba_engine::{BoxFuture, QueueOptions};

use crate::job::Job;

/// Processing function of a task type.
///
/// Receives the wrapped [`Job`]; the returned value becomes the job's result.
pub type TaskFn = Arc<dyn Fn(Job) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// A named task type together with its processing function.
#[derive(Clone)]
pub struct TaskDescriptor {
    pub id: String,
    pub processor: TaskFn,
    pub options: QueueOptions,
}

impl TaskDescriptor {
    /// Build a descriptor from an async function returning any serialisable
    /// value.
    pub fn new<F, Fut, R>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Serialize,
    {
        let processor: TaskFn = Arc::new(
            move |job: Job| -> BoxFuture<'static, anyhow::Result<Value>> {
                let fut = f(job);
                Box::pin(async move { Ok(serde_json::to_value(fut.await?)?) })
            },
        );

        Self {
            id: id.into(),
            processor,
            options: QueueOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QueueOptions) -> Self {
        self.options = options;
        self
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("id", &self.id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
