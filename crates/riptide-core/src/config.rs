//! Hasher configuration.

use std::time::Duration;

use riptide_primitives::CHUNK_LEN;

use crate::error::{HashError, Result};

/// Default number of hashing workers.
pub const DEFAULT_WORKER_COUNT: usize = 6;

/// Default maximum leaf size (1 MiB).
///
/// Larger leaves reduce per-task overhead (dispatch messages, tree nodes)
/// while BLAKE3 throughput stays flat, so 1 MiB is a good general-purpose
/// setting. Leaves near the right edge of the tree may be smaller to satisfy
/// subtree alignment.
pub const DEFAULT_MAX_LEAF_SIZE: u64 = 1024 * 1024;

/// Default number of tasks a single worker may have in flight.
///
/// Two lets a worker have its next task staged while it is still hashing the
/// previous one, hiding the inter-thread wakeup latency.
pub const DEFAULT_MAX_INFLIGHT_PER_WORKER: usize = 2;

/// Inputs below this size skip the pipeline and hash in one shot.
pub const SMALL_INPUT_THRESHOLD: u64 = 65536;

/// Configuration for [`ParallelHasher`](crate::ParallelHasher).
#[derive(Debug, Clone)]
pub struct HasherConfig {
    /// Number of hashing worker threads.
    pub worker_count: usize,
    /// Maximum leaf size in bytes. Must be a positive multiple of 1024.
    pub max_leaf_size: u64,
    /// Maximum tasks in flight per worker.
    pub max_inflight_per_worker: usize,
    /// Per-task completion deadline.
    pub task_timeout: Duration,
    /// Per-worker readiness deadline during `init`.
    pub worker_init_timeout: Duration,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            max_leaf_size: DEFAULT_MAX_LEAF_SIZE,
            max_inflight_per_worker: DEFAULT_MAX_INFLIGHT_PER_WORKER,
            task_timeout: Duration::from_secs(30),
            worker_init_timeout: Duration::from_secs(10),
        }
    }
}

impl HasherConfig {
    /// Set the number of worker threads.
    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the maximum leaf size in bytes.
    #[must_use]
    pub fn with_max_leaf_size(mut self, max_leaf_size: u64) -> Self {
        self.max_leaf_size = max_leaf_size;
        self
    }

    /// Set the per-worker in-flight task limit.
    #[must_use]
    pub fn with_max_inflight_per_worker(mut self, max_inflight: usize) -> Self {
        self.max_inflight_per_worker = max_inflight;
        self
    }

    /// Set the per-task completion deadline.
    #[must_use]
    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    /// Total number of buffer slots the pool provides.
    #[must_use]
    pub fn num_slots(&self) -> usize {
        self.worker_count * self.max_inflight_per_worker
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::InvalidOptions`] when the worker count or
    /// in-flight limit is zero, or when `max_leaf_size` is not a positive
    /// multiple of 1024.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(HashError::InvalidOptions(
                "worker_count must be at least 1".into(),
            ));
        }
        if self.max_inflight_per_worker == 0 {
            return Err(HashError::InvalidOptions(
                "max_inflight_per_worker must be at least 1".into(),
            ));
        }
        if self.max_leaf_size == 0 || self.max_leaf_size % CHUNK_LEN as u64 != 0 {
            return Err(HashError::InvalidOptions(format!(
                "max_leaf_size must be a positive multiple of {CHUNK_LEN}, got {}",
                self.max_leaf_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HasherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_count, 6);
        assert_eq!(config.max_leaf_size, 1024 * 1024);
        assert_eq!(config.num_slots(), 12);
    }

    #[test]
    fn test_builder_methods() {
        let config = HasherConfig::default()
            .with_worker_count(3)
            .with_max_leaf_size(4096)
            .with_max_inflight_per_worker(4);
        assert!(config.validate().is_ok());
        assert_eq!(config.num_slots(), 12);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let config = HasherConfig::default().with_worker_count(0);
        assert!(matches!(
            config.validate(),
            Err(HashError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_rejects_unaligned_leaf_size() {
        for bad in [0u64, 1, 1023, 1025, 4097] {
            let config = HasherConfig::default().with_max_leaf_size(bad);
            assert!(
                matches!(config.validate(), Err(HashError::InvalidOptions(_))),
                "max_leaf_size={bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_zero_inflight() {
        let config = HasherConfig::default().with_max_inflight_per_worker(0);
        assert!(matches!(
            config.validate(),
            Err(HashError::InvalidOptions(_))
        ));
    }
}
