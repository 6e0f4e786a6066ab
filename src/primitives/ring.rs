//! Single-producer single-consumer fixed-capacity ring buffer.
//!
//! One producer thread calls [`SpscRingBuffer::push`], one consumer thread
//! calls [`SpscRingBuffer::pop`]; any other access pattern is a contract
//! violation the type does not detect. Capacity is fixed at construction
//! and checked against a safety cap so a caller-controlled element count
//! cannot overflow the backing allocation size.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::CoreError;
use crate::primitives::checked::mul_size;

/// Upper bound on `capacity * size_of::<T>()`, in bytes. Exists so a
/// caller-supplied capacity cannot be used to request an absurd
/// allocation; this is a sanity cap, not a tuning knob.
pub const RING_SAFETY_CAP_BYTES: usize = 1 << 30; // 1 GiB

/// A bounded SPSC queue of `T`.
pub struct SpscRingBuffer<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Usable capacity (one less than `slots.len()`; the ring always keeps
    /// one slot empty to distinguish full from empty without a separate
    /// counter).
    capacity: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// SAFETY: access is split so only the producer ever touches `tail`-owned
// slots and only the consumer ever touches `head`-owned slots; the atomics
// provide the necessary happens-before edges. Requires `T: Send` since
// ownership of values crosses threads.
unsafe impl<T: Send> Sync for SpscRingBuffer<T> {}
unsafe impl<T: Send> Send for SpscRingBuffer<T> {}

impl<T> SpscRingBuffer<T> {
    /// Creates a ring buffer holding up to `capacity` elements.
    ///
    /// `capacity` must be at least 1, and `capacity * size_of::<T>()` must
    /// not overflow `usize` or exceed [`RING_SAFETY_CAP_BYTES`].
    pub fn new(capacity: usize) -> Result<Self, CoreError> {
        if capacity == 0 {
            return Err(CoreError::invalid_argument().with_context("capacity must be >= 1"));
        }
        let element_size = std::mem::size_of::<T>().max(1);
        let total_bytes = mul_size(capacity, element_size)
            .ok_or_else(|| CoreError::invalid_argument().with_context("capacity overflow"))?;
        if total_bytes > RING_SAFETY_CAP_BYTES {
            return Err(
                CoreError::invalid_argument().with_context("capacity exceeds safety cap")
            );
        }
        let internal_capacity = capacity
            .checked_add(1)
            .ok_or_else(|| CoreError::invalid_argument().with_context("capacity overflow"))?;
        let slots = (0..internal_capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            slots,
            capacity,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        })
    }

    fn internal_capacity(&self) -> usize {
        self.slots.len()
    }

    /// Attempts to push `value`. Returns `false` without modifying the
    /// buffer if it is full.
    pub fn push(&self, value: T) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        let next_tail = (tail + 1) % self.internal_capacity();
        if next_tail == head {
            return false;
        }
        // SAFETY: only the producer writes slot `tail`, and the consumer
        // cannot have read it yet (it is not between `head` and `tail`).
        unsafe {
            (*self.slots[tail].get()).write(value);
        }
        self.tail.store(next_tail, Ordering::Release);
        true
    }

    /// Attempts to pop the oldest element. Returns `None` without
    /// modifying the buffer if it is empty.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // SAFETY: slot `head` was published by the producer's `Release`
        // store to `tail` and has not been popped since.
        let value = unsafe { (*self.slots[head].get()).assume_init_read() };
        let next_head = (head + 1) % self.internal_capacity();
        self.head.store(next_head, Ordering::Release);
        Some(value)
    }

    /// True if the buffer currently holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// True if the buffer is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        (tail + 1) % self.internal_capacity() == head
    }

    /// The usable capacity (not counting the internal sentinel slot).
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Drop for SpscRingBuffer<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}
