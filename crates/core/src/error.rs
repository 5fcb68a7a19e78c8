//! Registry error model.

use thiserror::Error;

use jobba_engine::EngineError;

/// Result type used by the task registry.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// A task id was used that was never registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown task: {0}")]
pub struct UnknownTaskError(pub String);

/// Registry-level error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error(transparent)]
    UnknownTask(#[from] UnknownTaskError),

    /// Failure reported by the Queue Engine, passed through unchanged.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<serde_json::Error> for RegistryError {
    fn from(value: serde_json::Error) -> Self {
        Self::Engine(value.into())
    }
}
