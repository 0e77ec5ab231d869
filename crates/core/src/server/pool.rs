//! Pooled, reference-counted frame storage for fan-out to many clients.
//!
//! A frame is copied once into a [`SharedBuffer`]; each client queue holds a
//! clone. The storage goes back to the [`ByteArrayPool`] when the last clone
//! is dropped.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Bucket capacities, smallest first.
pub const BUCKET_SIZES: [usize; 10] = [
    4 * 1024,
    8 * 1024,
    16 * 1024,
    32 * 1024,
    64 * 1024,
    128 * 1024,
    256 * 1024,
    512 * 1024,
    1024 * 1024,
    2048 * 1024,
];

/// Arrays retained per bucket; extra returns are freed.
pub const MAX_PER_BUCKET: usize = 32;

#[derive(Debug)]
pub struct ByteArrayPool {
    buckets: Mutex<Vec<Vec<Vec<u8>>>>,
}

impl Default for ByteArrayPool {
    fn default() -> Self {
        Self {
            buckets: Mutex::new(vec![Vec::new(); BUCKET_SIZES.len()]),
        }
    }
}

impl ByteArrayPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An empty vector with capacity for at least `len` bytes.
    pub fn acquire(&self, len: usize) -> Vec<u8> {
        let Some(bucket) = BUCKET_SIZES.iter().position(|&size| size >= len) else {
            return Vec::with_capacity(len);
        };
        self.buckets.lock()[bucket]
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(BUCKET_SIZES[bucket]))
    }

    /// Return storage to the largest bucket its capacity covers.
    pub fn release(&self, mut buf: Vec<u8>) {
        let capacity = buf.capacity();
        if capacity > BUCKET_SIZES[BUCKET_SIZES.len() - 1] {
            return;
        }
        let Some(bucket) = BUCKET_SIZES.iter().rposition(|&size| size <= capacity) else {
            return;
        };
        buf.clear();
        let mut buckets = self.buckets.lock();
        if buckets[bucket].len() < MAX_PER_BUCKET {
            buckets[bucket].push(buf);
        }
    }

    /// Number of arrays currently retained across all buckets.
    pub fn pooled(&self) -> usize {
        self.buckets.lock().iter().map(Vec::len).sum()
    }
}

struct PooledBytes {
    data: Vec<u8>,
    pool: Weak<ByteArrayPool>,
}

impl Drop for PooledBytes {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.release(std::mem::take(&mut self.data));
        }
    }
}

/// Immutable pooled bytes shared by reference count.
#[derive(Clone)]
pub struct SharedBuffer {
    inner: Arc<PooledBytes>,
}

impl SharedBuffer {
    pub fn copy_from(pool: &Arc<ByteArrayPool>, bytes: &[u8]) -> Self {
        let mut data = pool.acquire(bytes.len());
        data.extend_from_slice(bytes);
        Self {
            inner: Arc::new(PooledBytes {
                data,
                pool: Arc::downgrade(pool),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// Live clones of this buffer, including `self`.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl AsRef<[u8]> for SharedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.inner.data
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("len", &self.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}
