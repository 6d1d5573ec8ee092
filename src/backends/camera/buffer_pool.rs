// SPDX-License-Identifier: GPL-3.0-only

//! Reusable preview callback buffers
//!
//! Drivers fill buffers taken from the pool and hand them to the provider's
//! callback; the provider puts each buffer back once the listener returns.
//! When every buffer is in flight the driver drops the frame instead of
//! allocating, so a slow listener throttles delivery rather than memory.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Fixed ring of equally sized byte buffers
pub struct BufferPool {
    free: Mutex<VecDeque<Vec<u8>>>,
    buffer_size: usize,
    capacity: usize,
    /// Frames dropped because no buffer was free
    exhausted: AtomicU64,
}

impl BufferPool {
    /// Allocate `count` buffers of `buffer_size` bytes each
    pub fn new(count: usize, buffer_size: usize) -> Self {
        let free = (0..count).map(|_| vec![0u8; buffer_size]).collect();
        Self {
            free: Mutex::new(free),
            buffer_size,
            capacity: count,
            exhausted: AtomicU64::new(0),
        }
    }

    /// Take a free buffer, or `None` if all buffers are in flight
    pub fn acquire(&self) -> Option<Vec<u8>> {
        let buffer = self.lock().pop_front();
        if buffer.is_none() {
            let dropped = self.exhausted.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(dropped, "Callback buffers exhausted, dropping frame");
        }
        buffer
    }

    /// Return a buffer to the ring
    ///
    /// Buffers of the wrong size (left over from a previous configuration)
    /// and buffers beyond capacity are discarded.
    pub fn release(&self, buffer: Vec<u8>) {
        if buffer.len() != self.buffer_size {
            return;
        }
        let mut free = self.lock();
        if free.len() < self.capacity {
            free.push_back(buffer);
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of buffers currently available
    pub fn available(&self) -> usize {
        self.lock().len()
    }

    /// Number of frames dropped for lack of a buffer
    pub fn exhausted_count(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Vec<u8>>> {
        // A poisoned ring still holds valid buffers
        self.free.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size)
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}
