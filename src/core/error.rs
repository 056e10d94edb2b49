//! Error types for dispatch operations.

use thiserror::Error;

/// Errors produced by dispatcher components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The task ring has no free slot.
    #[error("task queue is full, limit: {limit}")]
    QueueFull {
        /// Ring capacity.
        limit: usize,
    },
    /// The task ring holds no task.
    #[error("task queue is empty")]
    Empty,
    /// The pool is running a task and cannot be changed.
    #[error("pool is busy")]
    PoolBusy,
    /// The device queue has already been published.
    #[error("device queue is already publishing")]
    AlreadyPublishing,
    /// The device queue has not finished loading.
    #[error("device queue is not ready")]
    NotReady,
    /// The device source could not be read.
    #[error("device source unavailable: {0}")]
    SourceUnavailable(String),
    /// Configuration is missing or invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A worker could not be constructed.
    #[error("worker creation failed: {0}")]
    WorkerCreate(String),
    /// The worker was already destroyed.
    #[error("worker already destroyed")]
    WorkerDestroyed,
    /// A message could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Application-facing result using anyhow for bootstrap contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
