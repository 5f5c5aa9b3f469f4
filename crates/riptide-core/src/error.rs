//! Error types for the parallel hasher.

use thiserror::Error;

/// Errors surfaced by hasher operations.
#[derive(Debug, Error)]
pub enum HashError {
    /// `hash_file` was called before `init`.
    #[error("hasher is not initialized; call init() first")]
    NotInitialized,

    /// The hasher was terminated and must be re-initialized before use.
    #[error("hasher has been terminated")]
    Terminated,

    /// Configuration validation failed.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// A worker did not report ready within the init timeout.
    #[error("worker {worker_index} failed to initialize in time")]
    WorkerInitTimeout {
        /// Index of the worker that missed the deadline.
        worker_index: usize,
    },

    /// A worker died or reported a fatal error.
    #[error("worker {worker_index} failed: {message}")]
    WorkerFailure {
        /// Index of the failed worker.
        worker_index: usize,
        /// Description of the failure.
        message: String,
    },

    /// A dispatched hash task did not complete within the task timeout.
    #[error("hash task {task_id} timed out")]
    TaskTimeout {
        /// Id of the expired task.
        task_id: u64,
    },

    /// The input stream failed, ended early, or delivered more than the
    /// declared total size.
    #[error("stream error: {0}")]
    Stream(#[from] std::io::Error),

    /// Internal tree-state violation (e.g. a chaining value delivered twice
    /// for the same node).
    #[error("tree state corrupted: {0}")]
    TreeCorrupted(String),
}

/// Result type for hasher operations.
pub type Result<T> = std::result::Result<T, HashError>;
