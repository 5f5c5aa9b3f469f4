//! Public hasher entry point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use riptide_primitives::{hash_single, Digest};

use crate::config::{HasherConfig, SMALL_INPUT_THRESHOLD};
use crate::dispatch::Dispatcher;
use crate::error::{HashError, Result};
use crate::plan::TreePlan;
use crate::pool::SlotPool;
use crate::stream::{drain, ChunkStream};
use crate::worker::{WorkerPool, WorkerStats};

/// Result of one [`ParallelHasher::hash_file`] call.
#[derive(Debug, Clone)]
pub struct HashOutput {
    /// The 32-byte BLAKE3 digest of the input.
    pub digest: Digest,
    /// Wall-clock duration of the call.
    pub elapsed: Duration,
    /// Per-worker task counters for this call. All zero when the small-input
    /// shortcut bypassed the worker pool.
    pub worker_stats: Vec<WorkerStats>,
}

enum State {
    Created,
    Ready {
        workers: WorkerPool,
        pool: Arc<SlotPool>,
    },
    Terminated,
}

/// Parallel BLAKE3 streaming hasher.
///
/// Owns a pool of hashing worker threads and a fixed set of leaf buffers.
/// One instance serves many [`hash_file`](Self::hash_file) calls; workers and
/// buffers are created by [`init`](Self::init) and live until
/// [`terminate`](Self::terminate).
///
/// # Example
///
/// ```no_run
/// use riptide_core::{HasherConfig, MemoryStream, ParallelHasher};
///
/// # async fn example() -> riptide_core::Result<()> {
/// let mut hasher = ParallelHasher::new(HasherConfig::default())?;
/// hasher.init().await?;
///
/// let data = vec![0u8; 8 * 1024 * 1024];
/// let mut stream = MemoryStream::new(data.clone());
/// let output = hasher.hash_file(&mut stream, data.len() as u64).await?;
/// println!("{}", output.digest);
///
/// hasher.terminate();
/// # Ok(())
/// # }
/// ```
pub struct ParallelHasher {
    config: HasherConfig,
    state: State,
    next_task_id: u64,
}

impl ParallelHasher {
    /// Create a hasher with the given configuration.
    ///
    /// # Errors
    ///
    /// [`HashError::InvalidOptions`] when the configuration is invalid.
    pub fn new(config: HasherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: State::Created,
            next_task_id: 0,
        })
    }

    /// Spawn the worker threads and allocate the slot pool.
    ///
    /// No-op on an already-initialized hasher; re-arms one that was
    /// terminated.
    ///
    /// # Errors
    ///
    /// [`HashError::WorkerInitTimeout`] or [`HashError::WorkerFailure`] when
    /// a worker does not come up; workers that already started are torn down
    /// and the hasher stays uninitialized.
    pub async fn init(&mut self) -> Result<()> {
        if matches!(self.state, State::Ready { .. }) {
            return Ok(());
        }
        let pool = SlotPool::new(
            self.config.num_slots(),
            usize::try_from(self.config.max_leaf_size)
                .map_err(|_| HashError::InvalidOptions("max_leaf_size exceeds usize".into()))?,
        );
        let workers = WorkerPool::spawn(
            self.config.worker_count,
            self.config.worker_init_timeout,
            Arc::clone(&pool),
        )
        .await?;
        tracing::info!(
            workers = self.config.worker_count,
            slots = pool.capacity(),
            slot_size = pool.slot_size(),
            "hasher initialized"
        );
        self.state = State::Ready { workers, pool };
        Ok(())
    }

    /// Hash a stream of `total_size` bytes and return its BLAKE3 digest.
    ///
    /// The stream must deliver exactly `total_size` bytes; anything else is a
    /// [`HashError::Stream`]. Inputs below 64 KiB, and inputs that plan to a
    /// single leaf, are hashed in one shot without touching the worker pool.
    ///
    /// # Errors
    ///
    /// [`HashError::NotInitialized`] before [`init`](Self::init),
    /// [`HashError::Terminated`] after [`terminate`](Self::terminate), plus
    /// the stream, worker, and timeout failures described in
    /// [`HashError`].
    pub async fn hash_file<S: ChunkStream>(
        &mut self,
        stream: &mut S,
        total_size: u64,
    ) -> Result<HashOutput> {
        let started = Instant::now();
        let State::Ready { workers, pool } = &self.state else {
            return Err(match self.state {
                State::Terminated => HashError::Terminated,
                _ => HashError::NotInitialized,
            });
        };

        if total_size < SMALL_INPUT_THRESHOLD {
            let data = drain(stream, total_size).await?;
            return Ok(self.shortcut_output(hash_single(&data), started, total_size));
        }

        let plan = TreePlan::build(total_size, self.config.max_leaf_size);
        if plan.is_single_leaf() {
            // A single-leaf tree must be finalized as a complete input; a
            // subtree chaining value would lack the root flag.
            let data = drain(stream, total_size).await?;
            return Ok(self.shortcut_output(hash_single(&data), started, total_size));
        }

        let dispatcher = Dispatcher::new(
            stream,
            &plan,
            pool,
            workers,
            &self.config,
            &mut self.next_task_id,
        );
        let (digest, worker_stats) = dispatcher.run().await?;

        let elapsed = started.elapsed();
        tracing::info!(
            digest = %hex::encode(&digest.as_bytes()[..8]),
            bytes = total_size,
            leaves = plan.num_leaves(),
            elapsed_ms = elapsed.as_millis() as u64,
            "hash complete"
        );
        Ok(HashOutput {
            digest,
            elapsed,
            worker_stats,
        })
    }

    fn shortcut_output(&self, digest: Digest, started: Instant, total_size: u64) -> HashOutput {
        let elapsed = started.elapsed();
        tracing::debug!(
            digest = %hex::encode(&digest.as_bytes()[..8]),
            bytes = total_size,
            elapsed_ms = elapsed.as_millis() as u64,
            "hashed in one shot"
        );
        HashOutput {
            digest,
            elapsed,
            worker_stats: (0..self.config.worker_count)
                .map(|worker_index| WorkerStats {
                    worker_index,
                    ..WorkerStats::default()
                })
                .collect(),
        }
    }

    /// Stop all workers and release the slot pool.
    ///
    /// Idempotent and infallible. The hasher refuses further `hash_file`
    /// calls until re-initialized with [`init`](Self::init).
    pub fn terminate(&mut self) {
        if let State::Ready { workers, .. } = &mut self.state {
            workers.terminate();
            tracing::info!("hasher terminated");
        }
        self.state = State::Terminated;
    }

    /// The configuration this hasher was built with.
    #[must_use]
    pub fn config(&self) -> &HasherConfig {
        &self.config
    }

    /// Make a worker thread panic on its next request. Test instrumentation
    /// for the worker-crash failure path; no-op before `init`.
    #[cfg(any(test, feature = "test-util"))]
    pub fn crash_worker(&self, worker_index: usize) {
        if let State::Ready { workers, .. } = &self.state {
            workers.crash_worker(worker_index);
        }
    }

    /// Make a worker thread sleep before taking its next request. Test
    /// instrumentation for the slow-worker failure path; no-op before
    /// `init`.
    #[cfg(any(test, feature = "test-util"))]
    pub fn stall_worker(&self, worker_index: usize, duration: Duration) {
        if let State::Ready { workers, .. } = &self.state {
            workers.stall_worker(worker_index, duration);
        }
    }
}
