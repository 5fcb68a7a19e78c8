//! Structured job log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use jobba_engine::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Error,
    Info,
    Warn,
}

/// One entry of a job's log trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    /// Captured when the entry is appended, not when it is flushed.
    pub time: DateTime<Utc>,
    /// Values exactly as passed by the caller.
    pub body: Vec<Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, body: Vec<Value>) -> Self {
        Self {
            level,
            time: Utc::now(),
            body,
        }
    }

    /// Render the body the way a console line would: strings unquoted,
    /// other values as compact JSON, separated by spaces.
    pub fn render(&self) -> String {
        self.body
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Mirror the entry into the process log.
    pub(crate) fn trace(&self, task: &str, job_id: JobId) {
        let message = self.render();
        match self.level {
            LogLevel::Debug => tracing::debug!(task, job_id = %job_id, "{message}"),
            LogLevel::Error => tracing::error!(task, job_id = %job_id, "{message}"),
            LogLevel::Info => tracing::info!(task, job_id = %job_id, "{message}"),
            LogLevel::Warn => tracing::warn!(task, job_id = %job_id, "{message}"),
        }
    }
}
