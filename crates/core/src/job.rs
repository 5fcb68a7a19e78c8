//! Job wrapper with write-through persistence.
//!
//! A [`Job`] wraps one engine-native job handle for the duration of a single
//! processing call. It keeps a local shadow of the job's log trail and state
//! and writes the full `{logs, params, state}` snapshot to the engine on
//! every mutation; a mutating call only returns once that write is done.
//!
//! ## Concurrency
//!
//! Mutations on one `Job` are serialised: the shadow is locked for the whole
//! append-and-persist sequence, so concurrent `log`/`update` calls can neither
//! interleave nor drop an intermediate snapshot. Two *different* `Job`
//! wrappers around the same engine job are not coordinated; the engine's last
//! write wins.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use jobba_engine::{EngineError, JobError, JobHandle, JobId, JobInfo, JobStatus};

use crate::log::{LogEntry, LogLevel};

/// Persisted payload of a job, as written by [`Job`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobData {
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub params: Value,
    /// `None` while state was never set (or explicitly cleared); an explicit
    /// JSON `null` is kept as `Some(Value::Null)`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub state: Option<Value>,
}

impl JobData {
    pub fn from_value(value: Value) -> Result<Self, EngineError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// A key that is present maps to `Some`, even when its value is `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Borrowed view serialised on every write.
#[derive(Serialize)]
struct Snapshot<'a> {
    logs: &'a [LogEntry],
    params: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a Value>,
}

#[derive(Debug, Default)]
struct Shadow {
    logs: Vec<LogEntry>,
    state: Option<Value>,
}

/// One unit of work handed to a processing function.
///
/// A `Job` is valid for a single processing call. Do not keep it, or use it,
/// after the processing function returns: the engine may already have
/// retried, completed or removed the underlying job.
pub struct Job {
    handle: Arc<dyn JobHandle>,
    params: Value,
    shadow: Mutex<Shadow>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.handle.id())
            .field("task", &self.handle.queue())
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Job {
    /// Wrap an engine job handle.
    ///
    /// When the engine already holds a snapshot for this job (a retried job,
    /// or a job looked up after the fact) the log trail and state are
    /// restored from it, so later writes extend the trail instead of
    /// replacing it.
    pub async fn attach(handle: Arc<dyn JobHandle>) -> Result<Self, EngineError> {
        let shadow = match handle.data().await? {
            Some(data) => {
                let data = JobData::from_value(data)?;
                Shadow {
                    logs: data.logs,
                    state: data.state,
                }
            }
            None => Shadow::default(),
        };

        Ok(Self {
            params: handle.params().clone(),
            handle,
            shadow: Mutex::new(shadow),
        })
    }

    pub fn id(&self) -> JobId {
        self.handle.id()
    }

    /// Id of the task this job was scheduled against.
    pub fn task(&self) -> &str {
        self.handle.queue()
    }

    /// Payload the job was scheduled with.
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Last state set through [`Job::update`].
    pub async fn state(&self) -> Option<Value> {
        self.shadow.lock().await.state.clone()
    }

    pub async fn logs(&self) -> Vec<LogEntry> {
        self.shadow.lock().await.logs.clone()
    }

    // Engine proxies.

    pub async fn progress(&self, value: f64) -> Result<(), EngineError> {
        self.handle.progress(value).await
    }

    pub async fn get_state(&self) -> Result<JobStatus, EngineError> {
        self.handle.get_state().await
    }

    pub async fn remove(&self) -> Result<(), EngineError> {
        self.handle.remove().await
    }

    pub async fn retry(&self) -> Result<(), EngineError> {
        self.handle.retry().await
    }

    pub async fn discard(&self) -> Result<(), EngineError> {
        self.handle.discard().await
    }

    pub async fn promote(&self) -> Result<(), EngineError> {
        self.handle.promote().await
    }

    pub async fn finished(&self) -> Result<Value, JobError> {
        self.handle.finished().await
    }

    /// Engine-side view of the job: status, progress, attempts.
    pub async fn details(&self) -> Result<JobInfo, EngineError> {
        self.handle.info().await
    }

    /// Read the snapshot currently persisted by the engine.
    pub async fn persisted(&self) -> Result<Option<JobData>, EngineError> {
        self.handle.data().await?.map(JobData::from_value).transpose()
    }

    // Write-through mutations.

    /// Set the state to exactly `state` and persist the full snapshot.
    ///
    /// `None` clears the state; use [`Job::flush`] to persist without
    /// touching it.
    pub async fn update(&self, state: Option<Value>) -> Result<(), EngineError> {
        let mut shadow = self.shadow.lock().await;
        let previous = std::mem::replace(&mut shadow.state, state);

        if let Err(e) = self.persist(&shadow).await {
            shadow.state = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Persist the full snapshot, leaving the state unchanged.
    pub async fn flush(&self) -> Result<(), EngineError> {
        let shadow = self.shadow.lock().await;
        self.persist(&shadow).await
    }

    /// Append a log entry and persist the full snapshot.
    pub async fn log<I, V>(&self, level: LogLevel, body: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let body: Vec<Value> = body.into_iter().map(Into::into).collect();

        let mut shadow = self.shadow.lock().await;
        let entry = LogEntry::new(level, body);
        entry.trace(self.task(), self.id());
        shadow.logs.push(entry);

        if let Err(e) = self.persist(&shadow).await {
            shadow.logs.pop();
            return Err(e);
        }
        Ok(())
    }

    pub async fn debug<I, V>(&self, body: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.log(LogLevel::Debug, body).await
    }

    pub async fn error<I, V>(&self, body: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.log(LogLevel::Error, body).await
    }

    pub async fn info<I, V>(&self, body: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.log(LogLevel::Info, body).await
    }

    pub async fn warn<I, V>(&self, body: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.log(LogLevel::Warn, body).await
    }

    async fn persist(&self, shadow: &Shadow) -> Result<(), EngineError> {
        let snapshot = serde_json::to_value(Snapshot {
            logs: &shadow.logs,
            params: &self.params,
            state: shadow.state.as_ref(),
        })?;
        self.handle.update(snapshot).await
    }
}
