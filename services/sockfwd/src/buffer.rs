//! Reusable copy buffers.
//!
//! Every copy direction checks a buffer out for the lifetime of one copy
//! and hands it back when the copy ends. The buffer size matches the
//! default block size of generic stream-copy helpers and is fixed.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Size of every pooled buffer (32 KiB).
pub const BUFFER_SIZE: usize = 32 * 1024;

/// Default number of idle buffers kept for reuse.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// Thread-safe pool of fixed-size byte buffers.
pub struct BufferPool {
    free: Mutex<Vec<Box<[u8]>>>,
    max_idle: usize,
    /// Buffers allocated over the pool's lifetime.
    allocated: AtomicUsize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    /// Create a pool that keeps at most `max_idle` buffers around.
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_idle,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Check a buffer out of the pool, allocating one if none is idle.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let reused = self.free_list().pop();
        let buf = reused.unwrap_or_else(|| {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            vec![0u8; BUFFER_SIZE].into_boxed_slice()
        });

        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(self),
        }
    }

    /// Number of buffers currently idle in the pool.
    pub fn idle(&self) -> usize {
        self.free_list().len()
    }

    /// Number of buffers allocated since the pool was created.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    fn put_back(&self, buf: Box<[u8]>) {
        let mut free = self.free_list();
        if free.len() < self.max_idle {
            free.push(buf);
        }
    }

    fn free_list(&self) -> MutexGuard<'_, Vec<Box<[u8]>>> {
        // Only plain Vec push/pop happen under the lock, so a poisoned
        // guard still holds a consistent free list.
        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.idle())
            .field("allocated", &self.allocated())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A buffer checked out of a [`BufferPool`].
///
/// Returned to the pool exactly once, on [`release`](Self::release) or drop.
pub struct PooledBuffer {
    buf: Option<Box<[u8]>>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    /// Return the buffer to its pool.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put_back(buf);
        }
    }
}
