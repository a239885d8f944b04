//! # Shared decode buffer pool
//!
//! [`TypedCodec`](crate::codecs::TypedCodec) streams decodes through
//! buffers leased from one shared [`BufferPool`] instead of allocating per
//! message. Buffers are kept in power-of-two size classes; a lease is
//! exclusive for its lifetime and its buffer goes back to the pool when
//! the lease drops, on every exit path. Once the pooled bytes would exceed
//! the pool's capacity a returned buffer is simply freed.
//!
//! The pool is an explicit service object: construct it once, share it via
//! `Arc`, and pass it to every codec that should draw from it.

use std::collections::HashMap;
use std::mem;
use std::sync::{Mutex, PoisonError};

use tracing::trace;

/// Default total pooled capacity: 10 MiB.
pub const DEFAULT_POOL_CAPACITY: usize = 10 * 1024 * 1024;

/// Default maximum size of a single lease: 1 MiB.
pub const DEFAULT_MAX_LEASE: usize = 1024 * 1024;

/// Smallest size class handed out, to keep tiny payloads from fragmenting
/// the class map.
const MIN_SIZE_CLASS: usize = 64;

/// A bounded pool of reusable decode buffers, safe to share across
/// threads. Buffers are keyed only by size class, never by payload type.
pub struct BufferPool {
    shelves: Mutex<Shelves>,
    capacity: usize,
    max_lease: usize,
}

struct Shelves {
    free: HashMap<usize, Vec<Vec<u8>>>,
    pooled_bytes: usize,
}

impl BufferPool {
    /// Creates a pool holding at most `capacity` bytes of idle buffers and
    /// refusing leases larger than `max_lease`.
    #[must_use]
    pub fn new(capacity: usize, max_lease: usize) -> Self {
        Self {
            shelves: Mutex::new(Shelves {
                free: HashMap::new(),
                pooled_bytes: 0,
            }),
            capacity,
            max_lease,
        }
    }

    /// Largest single lease this pool will serve.
    #[must_use]
    pub fn max_lease(&self) -> usize {
        self.max_lease
    }

    /// Checks out a buffer with at least `len` usable bytes. Returns
    /// `None` when `len` exceeds the maximum lease size; the caller is
    /// expected to fall back to plain allocation.
    ///
    /// A lease is exclusively owned until dropped, and dropping returns
    /// the buffer to the pool (or frees it when the pool is full).
    #[must_use]
    pub fn lease(&self, len: usize) -> Option<BufferLease<'_>> {
        if len > self.max_lease {
            trace!(len, max_lease = self.max_lease, "lease request over limit");
            return None;
        }
        let class = size_class(len);
        let mut shelves = self
            .shelves
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let buf = match shelves.free.get_mut(&class).and_then(Vec::pop) {
            Some(buf) => {
                shelves.pooled_bytes -= class;
                buf
            }
            None => {
                trace!(class, "pool miss, allocating");
                vec![0; class]
            }
        };
        Some(BufferLease {
            pool: self,
            buf,
            len,
        })
    }

    /// Bytes currently sitting idle in the pool.
    #[must_use]
    pub fn pooled_bytes(&self) -> usize {
        self.shelves
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pooled_bytes
    }

    fn release(&self, buf: Vec<u8>) {
        let class = buf.len();
        let mut shelves = self
            .shelves
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if shelves.pooled_bytes + class > self.capacity {
            trace!(class, "pool full, dropping returned buffer");
            return;
        }
        shelves.pooled_bytes += class;
        shelves.free.entry(class).or_default().push(buf);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY, DEFAULT_MAX_LEASE)
    }
}

fn size_class(len: usize) -> usize {
    len.next_power_of_two().max(MIN_SIZE_CLASS)
}

/// Exclusive ownership of a pooled buffer for the duration of one decode.
///
/// The usable region is exactly the requested length, regardless of the
/// size class actually backing it. Dropping the lease returns the buffer
/// to the pool on every exit path, success or failure.
pub struct BufferLease<'a> {
    pool: &'a BufferPool,
    buf: Vec<u8>,
    len: usize,
}

impl BufferLease<'_> {
    /// The leased region, sized to the request.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Mutable view of the leased region.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }

    /// Requested length of this lease.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the lease covers zero bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        self.pool.release(mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn lease_is_sized_to_request() {
        let pool = BufferPool::new(1024, 512);
        let mut lease = pool.lease(100).unwrap();
        assert_eq!(lease.len(), 100);
        assert_eq!(lease.as_mut_slice().len(), 100);
    }

    #[test]
    fn oversized_request_is_refused() {
        let pool = BufferPool::new(1024, 64);
        assert!(pool.lease(65).is_none());
        assert!(pool.lease(64).is_some());
    }

    #[test]
    fn dropped_lease_returns_to_pool_and_is_reused() {
        let pool = BufferPool::new(1024, 512);
        {
            let _lease = pool.lease(100).unwrap();
            assert_eq!(pool.pooled_bytes(), 0);
        }
        // 100 rounds up to the 128 class.
        assert_eq!(pool.pooled_bytes(), 128);
        let _again = pool.lease(100).unwrap();
        assert_eq!(pool.pooled_bytes(), 0);
    }

    #[test]
    fn returns_beyond_capacity_are_dropped() {
        let pool = BufferPool::new(128, 128);
        let a = pool.lease(128).unwrap();
        let b = pool.lease(128).unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.pooled_bytes(), 128);
    }

    #[test]
    fn concurrent_leases_never_alias() {
        // More in-flight leases than the pool capacity can hold: every
        // lease must still be a private buffer.
        let pool = Arc::new(BufferPool::new(2 * 1024, 1024));
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let mut lease = pool.lease(1024).unwrap();
                        let marker = u8::try_from(i).unwrap();
                        lease.as_mut_slice().fill(marker);
                        barrier.wait();
                        assert!(lease.as_slice().iter().all(|&b| b == marker));
                        barrier.wait();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
