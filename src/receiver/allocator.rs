//! Fixed-size pool of repairable audio frames

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;

use crate::error::AllocationError;

#[derive(Debug)]
struct Pool {
    free: Mutex<Vec<BytesMut>>,
    capacity: usize,
    slot_bytes: usize,
}

impl Pool {
    fn release(&self, mut buf: BytesMut) {
        buf.clear();
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(buf);
    }
}

/// Pool of [`Repairable`] slots
///
/// Allocation never blocks; an empty pool is reported as
/// `AllocationError::PoolExhausted` and the caller drops the packet.
#[derive(Debug, Clone)]
pub struct RepairableAllocator {
    pool: Arc<Pool>,
}

impl RepairableAllocator {
    /// Create a pool of `slots` buffers of `slot_bytes` each
    #[must_use]
    pub fn new(slots: usize, slot_bytes: usize) -> Self {
        let free = (0..slots).map(|_| BytesMut::with_capacity(slot_bytes)).collect();
        Self {
            pool: Arc::new(Pool {
                free: Mutex::new(free),
                capacity: slots,
                slot_bytes,
            }),
        }
    }

    /// Copy `payload` into a free slot
    ///
    /// # Errors
    ///
    /// Returns `AllocationError::PayloadTooLarge` if the payload does not fit
    /// a slot, or `AllocationError::PoolExhausted` if no slot is free.
    pub fn allocate(
        &self,
        frame: u16,
        timestamp: u32,
        resend: bool,
        payload: &[u8],
    ) -> Result<Repairable, AllocationError> {
        if payload.len() > self.pool.slot_bytes {
            return Err(AllocationError::PayloadTooLarge {
                len: payload.len(),
                max: self.pool.slot_bytes,
            });
        }

        let mut buf = self
            .pool
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or(AllocationError::PoolExhausted {
                capacity: self.pool.capacity,
            })?;
        buf.extend_from_slice(payload);

        Ok(Repairable {
            frame,
            timestamp,
            resend,
            buf: Some(buf),
            pool: self.pool.clone(),
        })
    }

    /// Free slots
    #[must_use]
    pub fn available(&self) -> usize {
        self.pool
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total slots
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pool.capacity
    }
}

/// One audio frame held by the repairer; returns its slot on drop
pub struct Repairable {
    frame: u16,
    timestamp: u32,
    resend: bool,
    buf: Option<BytesMut>,
    pool: Arc<Pool>,
}

impl Repairable {
    /// RTP sequence number
    #[must_use]
    pub fn frame(&self) -> u16 {
        self.frame
    }

    /// RTP timestamp
    #[must_use]
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Whether the frame arrived as a resend response
    #[must_use]
    pub fn resend(&self) -> bool {
        self.resend
    }

    /// Payload as received (still encrypted)
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl fmt::Debug for Repairable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repairable")
            .field("frame", &self.frame)
            .field("timestamp", &self.timestamp)
            .field("resend", &self.resend)
            .field("len", &self.data().len())
            .finish()
    }
}

impl Drop for Repairable {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_release() {
        let allocator = RepairableAllocator::new(2, 16);
        let a = allocator.allocate(1, 352, false, &[1, 2, 3]).unwrap();
        assert_eq!(a.data(), &[1, 2, 3]);
        assert_eq!(a.frame(), 1);
        assert_eq!(allocator.available(), 1);

        drop(a);
        assert_eq!(allocator.available(), 2);

        // Reused slot starts empty
        let b = allocator.allocate(2, 704, true, &[9]).unwrap();
        assert_eq!(b.data(), &[9]);
        assert!(b.resend());
    }

    #[test]
    fn test_pool_exhausted() {
        let allocator = RepairableAllocator::new(1, 16);
        let _held = allocator.allocate(1, 0, false, &[]).unwrap();
        assert_eq!(
            allocator.allocate(2, 0, false, &[]).unwrap_err(),
            AllocationError::PoolExhausted { capacity: 1 }
        );
    }

    #[test]
    fn test_payload_too_large() {
        let allocator = RepairableAllocator::new(1, 4);
        assert_eq!(
            allocator.allocate(1, 0, false, &[0; 5]).unwrap_err(),
            AllocationError::PayloadTooLarge { len: 5, max: 4 }
        );
        assert_eq!(allocator.available(), 1);
    }
}
