//! Queue Engine boundary and an in-process reference engine.
//!
//! ## Design
//!
//! - The orchestration layer only talks to the engine through the traits in
//!   [`engine`]: `QueueEngine`, `QueueHandle`, `JobHandle`
//! - Every engine call is async and fails with [`EngineError`]
//! - [`MemoryEngine`] implements the boundary on tokio (dev/test, not durable)
//!
//! ## Components
//!
//! - `types`: ids, options, statuses and read views shared across the boundary
//! - `engine`: the boundary traits and the processor signature
//! - `memory`: queue backlog, worker tasks, retry/backoff handling

pub mod engine;
pub mod error;
pub mod memory;
pub mod types;

pub use engine::{BoxFuture, JobHandle, Processor, QueueEngine, QueueHandle, processor};
pub use error::{EngineError, JobError, ProcessingError};
pub use memory::MemoryEngine;
pub use types::{
    Backoff, BackoffStrategy, JobCounts, JobId, JobInfo, JobOptions, JobStatus, QueueOptions,
    RateLimit,
};
