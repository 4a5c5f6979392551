//! Bounded single-producer/single-consumer ring queue
//!
//! Each subscriber owns one `RingQueue`. The publisher's fanout is the only
//! writer and the subscriber's egress loop is the only reader; both sides
//! are wait-free and the writer never blocks on a slow consumer.
//!
//! Positions are free-running counters that are never masked, so the
//! emptiness predicate `read_pos == write_pos` and the used count
//! `write_pos - read_pos` stay correct across wrap. Masking only happens
//! when indexing into the slot array (capacity is a power of two).

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;

use super::message::MediaMessage;

/// What to do when a write finds the queue full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureStrategy {
    /// Drop the oldest queued message and accept the new one.
    DropOldest,
    /// Reject the new message.
    DropNewest,
}

/// Bounded SPSC queue of shared media messages.
pub struct RingQueue {
    slots: Box<[AtomicPtr<MediaMessage>]>,
    mask: u64,
    capacity: u64,
    write_pos: AtomicU64,
    read_pos: AtomicU64,
    dropped: AtomicU64,
    strategy: BackpressureStrategy,
}

impl RingQueue {
    /// Create a queue. `capacity` is rounded up to the next power of two.
    pub fn new(capacity: u32, strategy: BackpressureStrategy) -> Self {
        let capacity = u64::from(capacity.max(1)).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            mask: capacity - 1,
            capacity,
            write_pos: AtomicU64::new(0),
            read_pos: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            strategy,
        }
    }

    /// Write a message. Returns false only when the queue was full under
    /// `DropNewest`. Never blocks.
    pub fn write(&self, msg: Arc<MediaMessage>) -> bool {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);

        if write.wrapping_sub(read) >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match self.strategy {
                BackpressureStrategy::DropNewest => return false,
                BackpressureStrategy::DropOldest => {
                    // Skip the oldest entry; the slot itself is reclaimed by
                    // the swap below (full queue means it is the same slot).
                    self.read_pos.fetch_add(1, Ordering::AcqRel);
                }
            }
        }

        let idx = (write & self.mask) as usize;
        let old = self.slots[idx].swap(Arc::into_raw(msg) as *mut MediaMessage, Ordering::AcqRel);
        if !old.is_null() {
            // Displaced message under DropOldest.
            unsafe { drop(Arc::from_raw(old)) };
        }
        self.write_pos.store(write.wrapping_add(1), Ordering::Release);
        true
    }

    /// Read the next message, or None when the queue is empty.
    pub fn read(&self) -> Option<Arc<MediaMessage>> {
        loop {
            let read = self.read_pos.load(Ordering::Acquire);
            let write = self.write_pos.load(Ordering::Acquire);
            if read == write {
                return None;
            }
            // CAS so a concurrent drop-oldest from the writer cannot hand the
            // same position to both sides.
            if self
                .read_pos
                .compare_exchange(
                    read,
                    read.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                continue;
            }
            let idx = (read & self.mask) as usize;
            let p = self.slots[idx].swap(ptr::null_mut(), Ordering::AcqRel);
            if p.is_null() {
                continue;
            }
            return Some(unsafe { Arc::from_raw(p) });
        }
    }

    /// Messages dropped due to backpressure.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Free slots remaining.
    pub fn available(&self) -> u32 {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        let used = write.wrapping_sub(read).min(self.capacity);
        (self.capacity - used) as u32
    }

    /// True when no messages are queued.
    pub fn is_empty(&self) -> bool {
        self.read_pos.load(Ordering::Acquire) == self.write_pos.load(Ordering::Acquire)
    }

    /// Rounded-up capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }
}

impl Drop for RingQueue {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            let p = slot.swap(ptr::null_mut(), Ordering::AcqRel);
            if !p.is_null() {
                unsafe { drop(Arc::from_raw(p)) };
            }
        }
    }
}
