//! Streaming dispatch of leaf hash tasks.
//!
//! The dispatcher drives a single pass over the input stream. It fills one
//! slot per leaf in offset order, queues filled slots for dispatch, and
//! routes each to the least-loaded worker under dual backpressure: the
//! stream is read only while a slot is held, and a queued slot is dispatched
//! only while some worker is below its in-flight limit. Workers complete in
//! arbitrary order; their chaining values feed the combiner until the root
//! digest lands.
//!
//! The whole coordinator is one cooperative `select!` loop over
//! `{task deadline, worker reply, worker liveness, free slot, next stream
//! chunk}`. Everything else (`try_dispatch_pending`, CV delivery) is
//! synchronous, so the dispatcher state never races with itself.
//!
//! A worker that dies mid-job cannot answer, so waiting on its reply alone
//! would stall until the task deadline. While tasks are pending, a liveness
//! tick probes the owning worker threads and fails the call with a
//! `WorkerFailure` as soon as one has exited.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use riptide_primitives::Digest;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::combine::Combiner;
use crate::config::HasherConfig;
use crate::error::{HashError, Result};
use crate::plan::{NodeId, TreePlan};
use crate::pool::{Slot, SlotPool};
use crate::stream::ChunkStream;
use crate::worker::{HashReply, HashRequest, WorkerPool, WorkerStats};

/// How often the dispatcher probes the liveness of workers that hold
/// pending tasks.
const WORKER_LIVENESS_PERIOD: std::time::Duration = std::time::Duration::from_millis(100);

/// A filled slot waiting for worker capacity.
struct PendingDispatch {
    slot: Slot,
    leaf_index: usize,
    len: usize,
}

/// A dispatched task awaiting its reply.
struct PendingTask {
    worker_index: usize,
    node_id: NodeId,
    len: usize,
    deadline: Instant,
}

/// Per-call coordinator state.
pub(crate) struct Dispatcher<'a, S> {
    stream: &'a mut S,
    plan: &'a TreePlan,
    pool: &'a Arc<SlotPool>,
    workers: &'a WorkerPool,
    config: &'a HasherConfig,
    combiner: Combiner<'a>,

    // Leaf filling
    current_leaf: usize,
    leaf_filled: usize,
    current_slot: Option<Slot>,
    carry: Bytes,
    eof: bool,

    // Dispatch
    pending_dispatches: VecDeque<PendingDispatch>,
    pending_tasks: HashMap<u64, PendingTask>,
    worker_inflight: Vec<usize>,
    next_task_id: &'a mut u64,
    reply_tx: mpsc::UnboundedSender<HashReply>,
    reply_rx: mpsc::UnboundedReceiver<HashReply>,
    liveness: tokio::time::Interval,

    stats: Vec<WorkerStats>,
}

impl<'a, S: ChunkStream> Dispatcher<'a, S> {
    pub fn new(
        stream: &'a mut S,
        plan: &'a TreePlan,
        pool: &'a Arc<SlotPool>,
        workers: &'a WorkerPool,
        config: &'a HasherConfig,
        next_task_id: &'a mut u64,
    ) -> Self {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let worker_count = workers.worker_count();
        let mut liveness = tokio::time::interval(WORKER_LIVENESS_PERIOD);
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Self {
            stream,
            combiner: Combiner::new(plan),
            plan,
            pool,
            workers,
            config,
            current_leaf: 0,
            leaf_filled: 0,
            current_slot: None,
            carry: Bytes::new(),
            eof: false,
            pending_dispatches: VecDeque::new(),
            pending_tasks: HashMap::new(),
            worker_inflight: vec![0; worker_count],
            next_task_id,
            reply_tx,
            reply_rx,
            liveness,
            stats: (0..worker_count)
                .map(|worker_index| WorkerStats {
                    worker_index,
                    ..WorkerStats::default()
                })
                .collect(),
        }
    }

    /// Run the pipeline to completion and return the root digest.
    pub async fn run(mut self) -> Result<(Digest, Vec<WorkerStats>)> {
        tracing::debug!(
            leaves = self.plan.num_leaves(),
            nodes = self.plan.num_nodes(),
            slots = self.pool.capacity(),
            workers = self.workers.worker_count(),
            "dispatcher started"
        );

        loop {
            let next_deadline = self.earliest_deadline();

            tokio::select! {
                biased;

                () = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)),
                        if next_deadline.is_some() => {
                    return Err(self.expire_task());
                }

                reply = self.reply_rx.recv() => {
                    // The dispatcher holds its own sender, so the channel
                    // cannot close while the loop runs.
                    let reply = reply.expect("reply channel closed");
                    if let Some(digest) = self.on_reply(reply)? {
                        debug_assert!(self.pending_tasks.is_empty());
                        debug_assert!(self.combiner.is_complete());
                        return Ok((digest, std::mem::take(&mut self.stats)));
                    }
                }

                _ = self.liveness.tick(), if !self.pending_tasks.is_empty() => {
                    self.check_worker_liveness()?;
                }

                slot = self.pool.acquire(), if self.needs_slot() => {
                    self.current_slot = Some(slot);
                    self.consume_carry()?;
                }

                chunk = self.stream.next_chunk(), if self.wants_chunk() => {
                    self.on_chunk(chunk?)?;
                }
            }
        }
    }

    /// More leaves remain and no slot is held for the next one.
    fn needs_slot(&self) -> bool {
        self.current_slot.is_none() && self.current_leaf < self.plan.num_leaves()
    }

    /// The stream should be polled: a slot is ready to fill and the previous
    /// chunk is fully consumed.
    fn wants_chunk(&self) -> bool {
        !self.eof
            && self.carry.is_empty()
            && self.current_slot.is_some()
            && self.current_leaf < self.plan.num_leaves()
    }

    fn on_chunk(&mut self, chunk: Option<Bytes>) -> Result<()> {
        match chunk {
            Some(chunk) => {
                self.carry = chunk;
                self.consume_carry()
            }
            None => {
                self.eof = true;
                if self.current_leaf < self.plan.num_leaves() {
                    let leaf = self.plan.node(self.plan.leaves()[self.current_leaf]);
                    return Err(HashError::Stream(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!(
                            "stream ended at byte {} of a {}-byte input",
                            leaf.offset + self.leaf_filled as u64,
                            self.plan.node(self.plan.root()).size
                        ),
                    )));
                }
                Ok(())
            }
        }
    }

    /// Copy carried bytes into the current slot, handing off each leaf as it
    /// fills. Stops when the carry is drained or the slot is given up and the
    /// next one is not immediately free.
    fn consume_carry(&mut self) -> Result<()> {
        while !self.carry.is_empty() {
            if self.current_leaf >= self.plan.num_leaves() {
                return Err(HashError::Stream(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "stream delivered more than the declared {} bytes",
                        self.plan.node(self.plan.root()).size
                    ),
                )));
            }
            let Some(slot) = self.current_slot.as_mut() else {
                // Wait for a slot; the select loop resumes the copy.
                return Ok(());
            };

            let leaf_size = self.plan.node(self.plan.leaves()[self.current_leaf]).size as usize;
            let take = usize::min(leaf_size - self.leaf_filled, self.carry.len());
            slot.buf[self.leaf_filled..self.leaf_filled + take]
                .copy_from_slice(&self.carry[..take]);
            self.carry.advance(take);
            self.leaf_filled += take;

            if self.leaf_filled == leaf_size {
                let slot = self.current_slot.take().expect("slot vanished mid-fill");
                tracing::trace!(
                    leaf = self.current_leaf,
                    slot = slot.index,
                    len = leaf_size,
                    "leaf filled"
                );
                self.pending_dispatches.push_back(PendingDispatch {
                    slot,
                    leaf_index: self.current_leaf,
                    len: leaf_size,
                });
                self.try_dispatch_pending()?;
                self.current_leaf += 1;
                self.leaf_filled = 0;
                if self.current_leaf < self.plan.num_leaves() {
                    // Fast path; if the pool is empty the select loop awaits
                    // the next release.
                    self.current_slot = self.pool.try_acquire();
                }
            }
        }
        Ok(())
    }

    /// Dispatch queued slots while any worker is under its in-flight limit.
    fn try_dispatch_pending(&mut self) -> Result<()> {
        while !self.pending_dispatches.is_empty() {
            let Some(worker_index) = self.pick_worker() else {
                break;
            };
            let pending = self
                .pending_dispatches
                .pop_front()
                .expect("checked non-empty");
            let node_id = self.plan.leaves()[pending.leaf_index];
            let leaf = self.plan.node(node_id);

            let task_id = *self.next_task_id;
            *self.next_task_id += 1;

            tracing::trace!(
                task_id,
                worker = worker_index,
                leaf = pending.leaf_index,
                offset = leaf.offset,
                len = pending.len,
                "dispatching leaf"
            );
            self.workers.dispatch(
                worker_index,
                HashRequest {
                    task_id,
                    slot: pending.slot,
                    len: pending.len,
                    file_offset: leaf.offset,
                    reply_tx: self.reply_tx.clone(),
                },
            )?;
            self.worker_inflight[worker_index] += 1;
            self.pending_tasks.insert(
                task_id,
                PendingTask {
                    worker_index,
                    node_id,
                    len: pending.len,
                    deadline: Instant::now() + self.config.task_timeout,
                },
            );
        }
        Ok(())
    }

    /// Least-loaded worker below the in-flight limit, lowest index on ties.
    fn pick_worker(&self) -> Option<usize> {
        self.worker_inflight
            .iter()
            .enumerate()
            .filter(|&(_, &inflight)| inflight < self.config.max_inflight_per_worker)
            // The index makes the key unique, so ties on load resolve to the
            // lowest worker index.
            .min_by_key(|&(index, &inflight)| (inflight, index))
            .map(|(index, _)| index)
    }

    fn on_reply(&mut self, reply: HashReply) -> Result<Option<Digest>> {
        let Some(task) = self.pending_tasks.remove(&reply.task_id) else {
            // Timed-out task whose worker answered anyway; the result is
            // ignored and the worker has already returned the slot.
            tracing::trace!(task_id = reply.task_id, "dropping late reply");
            return Ok(None);
        };
        self.worker_inflight[task.worker_index] -= 1;

        match reply.result {
            Ok(cv) => {
                let stats = &mut self.stats[task.worker_index];
                stats.tasks_completed += 1;
                stats.bytes_hashed += task.len as u64;

                // Capacity freed; dispatch before combining so the worker is
                // never idle while work is queued.
                self.try_dispatch_pending()?;
                self.combiner.deliver(task.node_id, cv)
            }
            Err(message) => {
                tracing::error!(
                    task_id = reply.task_id,
                    worker = task.worker_index,
                    %message,
                    "hash task failed"
                );
                Err(HashError::WorkerFailure {
                    worker_index: task.worker_index,
                    message,
                })
            }
        }
    }

    /// Fail the call when a worker holding pending tasks has died. Every
    /// task routed to that worker is rejected at once: the call carries the
    /// failing worker's index, and the dispatcher never resurfaces the
    /// remaining tasks. Queued replies are drained before this runs (the
    /// reply branch precedes the liveness branch), so a worker that answered
    /// and then died is not misreported.
    fn check_worker_liveness(&mut self) -> Result<()> {
        let dead = self
            .pending_tasks
            .values()
            .map(|task| task.worker_index)
            .find(|&worker_index| self.workers.is_worker_finished(worker_index));
        match dead {
            Some(worker_index) => {
                let stranded = self
                    .pending_tasks
                    .values()
                    .filter(|task| task.worker_index == worker_index)
                    .count();
                tracing::error!(worker = worker_index, stranded, "worker thread died mid-job");
                Err(HashError::WorkerFailure {
                    worker_index,
                    message: format!("worker thread exited with {stranded} task(s) in flight"),
                })
            }
            None => Ok(()),
        }
    }

    fn earliest_deadline(&self) -> Option<Instant> {
        self.pending_tasks.values().map(|task| task.deadline).min()
    }

    /// Fail the call for the task whose deadline has passed. The worker is
    /// left running; its late reply will be dropped and its slot returns to
    /// the pool through the worker itself.
    ///
    /// See the `Drop` impl for the slots the dispatcher itself still holds.
    fn expire_task(&mut self) -> HashError {
        let now = Instant::now();
        let expired = self
            .pending_tasks
            .iter()
            .filter(|(_, task)| task.deadline <= now)
            .min_by_key(|(_, task)| task.deadline)
            .map(|(&task_id, task)| (task_id, task.worker_index));
        match expired {
            Some((task_id, worker_index)) => {
                tracing::warn!(task_id, worker = worker_index, "hash task timed out");
                self.pending_tasks.remove(&task_id);
                self.worker_inflight[worker_index] -= 1;
                HashError::TaskTimeout { task_id }
            }
            // The timer only runs while a task is pending, so an expiry
            // without one is unreachable; report it rather than panic.
            None => HashError::TreeCorrupted("task deadline fired with no pending task".into()),
        }
    }
}

impl<S> Drop for Dispatcher<'_, S> {
    /// Return every slot the dispatcher still holds so the pool survives a
    /// failed call at full capacity. Slots handed to workers come back
    /// through the workers themselves.
    fn drop(&mut self) {
        if let Some(slot) = self.current_slot.take() {
            self.pool.release(slot);
        }
        while let Some(pending) = self.pending_dispatches.pop_front() {
            self.pool.release(pending.slot);
        }
    }
}
