//! Slot pool for zero-copy leaf dispatch.
//!
//! The pool pre-allocates a fixed number of leaf-sized buffers and recycles
//! them through a lock-free queue. The dispatcher fills a slot, hands it to a
//! worker inside the hash request, and the worker returns it to the pool once
//! it has reported its result. Ownership of a slot moves with it, so a buffer
//! has a single writer at every point in its life: the dispatcher while
//! filling, then the worker while hashing.
//!
//! Backpressure comes from a counting semaphore sized to the slot count: the
//! dispatcher awaits [`SlotPool::acquire`] before filling the next leaf and
//! is woken as soon as any worker releases a slot.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use tokio::sync::Semaphore;

/// A pooled leaf buffer.
///
/// `index` identifies the slot for logging and instrumentation; `buf` is the
/// backing storage, always `slot_size` bytes long while at rest in the pool.
#[derive(Debug)]
pub struct Slot {
    /// Stable slot identifier in `[0, num_slots)`.
    pub index: usize,
    /// Backing buffer.
    pub buf: Vec<u8>,
}

/// Fixed pool of reusable leaf buffers.
///
/// Thread-safe behind `Arc`: the dispatcher acquires on the coordinator task
/// while workers release from their own threads through the lock-free queue.
#[derive(Debug)]
pub struct SlotPool {
    slots: ArrayQueue<Slot>,
    available: Semaphore,
    num_slots: usize,
    slot_size: usize,
}

impl SlotPool {
    /// Create a pool of `num_slots` buffers of `slot_size` bytes each.
    #[must_use]
    pub fn new(num_slots: usize, slot_size: usize) -> Arc<Self> {
        let slots = ArrayQueue::new(num_slots);
        for index in 0..num_slots {
            let pushed = slots.push(Slot {
                index,
                buf: vec![0u8; slot_size],
            });
            debug_assert!(pushed.is_ok());
        }
        Arc::new(Self {
            slots,
            available: Semaphore::new(num_slots),
            num_slots,
            slot_size,
        })
    }

    /// Take a free slot without waiting.
    #[must_use]
    pub fn try_acquire(&self) -> Option<Slot> {
        let permit = self.available.try_acquire().ok()?;
        permit.forget();
        Some(self.pop_slot())
    }

    /// Take a free slot, waiting until a worker releases one.
    ///
    /// # Panics
    ///
    /// Panics if the pool's semaphore is closed, which the pool never does.
    pub async fn acquire(&self) -> Slot {
        let permit = self
            .available
            .acquire()
            .await
            .expect("slot semaphore closed");
        permit.forget();
        self.pop_slot()
    }

    fn pop_slot(&self) -> Slot {
        // A permit is only ever added after its slot is pushed, so holding a
        // permit guarantees the queue is non-empty.
        self.slots.pop().expect("slot queue empty while permit held")
    }

    /// Return a slot to the pool.
    ///
    /// Callable from any thread. The buffer is cleared and restored to the
    /// pool's slot size before it becomes acquirable again.
    pub fn release(&self, mut slot: Slot) {
        slot.buf.clear();
        slot.buf.resize(self.slot_size, 0);
        let pushed = self.slots.push(slot);
        debug_assert!(pushed.is_ok(), "released more slots than the pool owns");
        self.available.add_permits(1);
    }

    /// Number of slots currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.slots.len()
    }

    /// Total slot count.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.num_slots
    }

    /// Byte size of each slot.
    #[must_use]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }
}
