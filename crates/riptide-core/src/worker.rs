//! Hashing worker pool.
//!
//! Workers are OS threads: subtree hashing is CPU-bound and must not stall
//! the coordinator's event loop. Each worker owns a request channel and
//! replies on the per-call channel carried inside every request, so a worker
//! outlives any individual `hash_file` call. After replying (success or
//! error) the worker returns its slot to the pool; slot ownership therefore
//! never depends on the coordinator still listening.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use riptide_primitives::{hash_subtree, max_subtree_len, ChainingValue, CHUNK_LEN};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::error::{HashError, Result};
use crate::pool::{Slot, SlotPool};

/// A hash task routed to one worker.
pub(crate) struct HashRequest {
    /// Task id, unique within the hasher.
    pub task_id: u64,
    /// Slot holding the leaf bytes; returned to the pool by the worker.
    pub slot: Slot,
    /// Number of filled bytes at the front of the slot buffer.
    pub len: usize,
    /// Absolute byte offset of the leaf within the input.
    pub file_offset: u64,
    /// Reply channel of the call that dispatched this task.
    pub reply_tx: mpsc::UnboundedSender<HashReply>,
}

/// A worker's answer to one [`HashRequest`].
pub(crate) struct HashReply {
    pub task_id: u64,
    pub worker_index: usize,
    pub result: std::result::Result<ChainingValue, String>,
}

enum WorkerRequest {
    Hash(HashRequest),
    Shutdown,
    /// Panic the worker thread. Fault injection for failure-path tests.
    #[cfg(any(test, feature = "test-util"))]
    Crash,
    /// Block the worker thread for the given duration before it takes its
    /// next request. Fault injection for failure-path tests.
    #[cfg(any(test, feature = "test-util"))]
    Stall(Duration),
}

/// Per-worker counters for one `hash_file` call.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Index of the worker these counters describe.
    pub worker_index: usize,
    /// Hash tasks completed successfully.
    pub tasks_completed: u64,
    /// Leaf bytes hashed.
    pub bytes_hashed: u64,
}

/// Pool of hashing worker threads.
pub(crate) struct WorkerPool {
    senders: Vec<mpsc::UnboundedSender<WorkerRequest>>,
    handles: Vec<JoinHandle<()>>,
    pool: Arc<SlotPool>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers and wait for each to report ready.
    ///
    /// All threads start in parallel; readiness is then awaited with
    /// `init_timeout` per worker. Any failure tears down the workers that
    /// already started.
    pub async fn spawn(
        worker_count: usize,
        init_timeout: Duration,
        pool: Arc<SlotPool>,
    ) -> Result<Self> {
        let mut senders = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);
        let mut ready_rxs = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let (tx, rx) = mpsc::unbounded_channel();
            let (ready_tx, ready_rx) = oneshot::channel();
            let worker_pool = Arc::clone(&pool);
            let spawned = std::thread::Builder::new()
                .name(format!("riptide-worker-{index}"))
                .spawn(move || worker_main(index, worker_pool, rx, ready_tx));
            match spawned {
                Ok(handle) => {
                    senders.push(tx);
                    handles.push(handle);
                    ready_rxs.push(ready_rx);
                }
                Err(e) => {
                    let mut partial = Self {
                        senders,
                        handles,
                        pool,
                    };
                    partial.terminate();
                    return Err(HashError::WorkerFailure {
                        worker_index: index,
                        message: format!("failed to spawn worker thread: {e}"),
                    });
                }
            }
        }

        let mut workers = Self {
            senders,
            handles,
            pool,
        };
        for (index, ready_rx) in ready_rxs.into_iter().enumerate() {
            match timeout(init_timeout, ready_rx).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    workers.terminate();
                    return Err(HashError::WorkerFailure {
                        worker_index: index,
                        message: "worker exited during init".into(),
                    });
                }
                Err(_) => {
                    workers.terminate();
                    return Err(HashError::WorkerInitTimeout {
                        worker_index: index,
                    });
                }
            }
        }

        tracing::debug!(worker_count, "hash workers ready");
        Ok(workers)
    }

    /// Number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// Route a hash task to `worker_index`.
    ///
    /// # Errors
    ///
    /// [`HashError::WorkerFailure`] when the worker's channel is closed
    /// (the thread died). The request's slot is returned to the pool before
    /// the error surfaces.
    pub fn dispatch(&self, worker_index: usize, request: HashRequest) -> Result<()> {
        if let Err(send_err) = self.senders[worker_index].send(WorkerRequest::Hash(request)) {
            if let WorkerRequest::Hash(request) = send_err.0 {
                self.pool.release(request.slot);
            }
            return Err(HashError::WorkerFailure {
                worker_index,
                message: "worker channel closed".into(),
            });
        }
        Ok(())
    }

    /// Whether the worker's thread has exited.
    ///
    /// During a `hash_file` call no shutdown can be in progress, so a
    /// finished thread means the worker died. After `terminate` the handles
    /// are gone and every index reports finished.
    pub fn is_worker_finished(&self, worker_index: usize) -> bool {
        self.handles
            .get(worker_index)
            .is_none_or(|handle| handle.is_finished())
    }

    /// Make the worker thread panic on its next request. Test instrumentation.
    #[cfg(any(test, feature = "test-util"))]
    pub fn crash_worker(&self, worker_index: usize) {
        let _ = self.senders[worker_index].send(WorkerRequest::Crash);
    }

    /// Make the worker thread sleep before taking its next request. Test
    /// instrumentation.
    #[cfg(any(test, feature = "test-util"))]
    pub fn stall_worker(&self, worker_index: usize, duration: Duration) {
        let _ = self.senders[worker_index].send(WorkerRequest::Stall(duration));
    }

    /// Stop all workers and join their threads. Idempotent.
    pub fn terminate(&mut self) {
        for sender in &self.senders {
            let _ = sender.send(WorkerRequest::Shutdown);
        }
        self.senders.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_main(
    index: usize,
    pool: Arc<SlotPool>,
    mut rx: mpsc::UnboundedReceiver<WorkerRequest>,
    ready_tx: oneshot::Sender<()>,
) {
    let _ = ready_tx.send(());
    tracing::trace!(worker = index, "hash worker started");

    while let Some(request) = rx.blocking_recv() {
        match request {
            WorkerRequest::Hash(HashRequest {
                task_id,
                slot,
                len,
                file_offset,
                reply_tx,
            }) => {
                let result = run_task(&slot, len, file_offset);
                // The call that dispatched us may already have failed and
                // dropped its receiver; the reply is then discarded.
                let _ = reply_tx.send(HashReply {
                    task_id,
                    worker_index: index,
                    result,
                });
                pool.release(slot);
            }
            WorkerRequest::Shutdown => break,
            #[cfg(any(test, feature = "test-util"))]
            WorkerRequest::Crash => panic!("injected worker crash"),
            #[cfg(any(test, feature = "test-util"))]
            WorkerRequest::Stall(duration) => std::thread::sleep(duration),
        }
    }
    tracing::trace!(worker = index, "hash worker stopped");
}

/// Validate the subtree contract and hash the leaf bytes.
///
/// Violations are reported as task errors rather than panicking the worker:
/// the planner guarantees these invariants, so a failure here means the
/// dispatcher handed over a corrupt task.
fn run_task(
    slot: &Slot,
    len: usize,
    file_offset: u64,
) -> std::result::Result<ChainingValue, String> {
    if len == 0 {
        return Err("empty leaf".into());
    }
    if len > slot.buf.len() {
        return Err(format!(
            "leaf length {len} exceeds slot capacity {}",
            slot.buf.len()
        ));
    }
    if file_offset % CHUNK_LEN as u64 != 0 {
        return Err(format!("leaf offset {file_offset} is not chunk-aligned"));
    }
    if let Some(limit) = max_subtree_len(file_offset) {
        if len as u64 > limit {
            return Err(format!(
                "leaf of {len} bytes at offset {file_offset} exceeds subtree limit {limit}"
            ));
        }
    }
    Ok(hash_subtree(&slot.buf[..len], file_offset))
}
