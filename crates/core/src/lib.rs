//! Job lifecycle and task registry.
//!
//! This crate sits on top of a Queue Engine (see `jobba-engine`) and adds:
//!
//! - [`Job`]: engine-agnostic wrapper with a write-through log/state trail
//! - [`TaskRegistry`]: named task types bound to their processing functions

pub mod error;
pub mod job;
pub mod log;
pub mod registry;
pub mod task;

pub use error::{RegistryError, RegistryResult, UnknownTaskError};
pub use job::{Job, JobData};
pub use log::{LogEntry, LogLevel};
pub use registry::TaskRegistry;
pub use task::{TaskDescriptor, TaskFn};

pub use jobba_engine::{
    EngineError, JobCounts, JobError, JobId, JobInfo, JobOptions, JobStatus, ProcessingError,
    QueueOptions,
};
