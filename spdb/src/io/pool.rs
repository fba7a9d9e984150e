//! Encode buffer pool
//!
//! Writers encode each record into a scratch buffer before writing it out. Buffers are
//! recycled through a shared pool so steady state writing does not allocate.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

const BUFFER_CAPACITY: usize = 64 * 1024;

const MAX_POOLED: usize = 16;

/// A pool of reusable byte buffers.
///
/// Cloning is cheap and clones share the same buffers, so one pool may serve any number of
/// writers, on any thread.
#[derive(Clone, Debug, Default)]
pub struct BufferPool {
    buffers: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl BufferPool {
    /// Create an empty pool. Buffers are allocated on demand.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a cleared buffer from the pool. It goes back when the guard is dropped.
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let buf = self
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(BUFFER_CAPACITY));
        PooledBuffer { pool: self, buf }
    }

    /// Number of idle buffers.
    pub fn available(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut buffers = self.lock();
        if buffers.len() < MAX_POOLED {
            buffers.push(buf);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        // A panic while holding the lock cannot leave a Vec of Vecs inconsistent
        self.buffers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A buffer on loan from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Vec<u8>,
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
