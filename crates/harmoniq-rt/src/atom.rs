use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::diag::OverflowCounter;
use crate::ring::RingBuffer;

/// Bytes taken by `size`, `type` and `index` in front of every payload.
pub const ATOM_HEADER_SIZE: usize = 12;

static NEXT_RING_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AtomReadError {
    #[error("message of {size} bytes does not fit a {max} byte buffer and was skipped")]
    TooLarge { size: usize, max: usize },
    #[error("ring holds a header without its payload")]
    Truncated,
}

/// Header of a message read out of an [`AtomRingBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomHeader {
    pub size: u32,
    pub atom_type: u32,
    pub index: i32,
}

impl AtomHeader {
    fn to_bytes(self) -> [u8; ATOM_HEADER_SIZE] {
        let mut bytes = [0u8; ATOM_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.size.to_ne_bytes());
        bytes[4..8].copy_from_slice(&self.atom_type.to_ne_bytes());
        bytes[8..12].copy_from_slice(&self.index.to_ne_bytes());
        bytes
    }

    fn from_bytes(bytes: [u8; ATOM_HEADER_SIZE]) -> Self {
        let word = |at: usize| [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
        Self {
            size: u32::from_ne_bytes(word(0)),
            atom_type: u32::from_ne_bytes(word(4)),
            index: i32::from_ne_bytes(word(8)),
        }
    }
}

/// Typed, addressed messages framed on top of a [`RingBuffer`].
///
/// The header and payload of a message are written tentatively and committed
/// together, so readers see whole messages or nothing.
#[derive(Debug)]
pub struct AtomRingBuffer {
    ring: RingBuffer,
}

impl AtomRingBuffer {
    pub fn new(size: usize) -> Self {
        Self {
            ring: RingBuffer::new(size),
        }
    }

    pub fn size(&self) -> usize {
        self.ring.size()
    }

    /// Largest payload a single message may carry.
    pub fn max_payload(&self) -> usize {
        self.ring.capacity().saturating_sub(ATOM_HEADER_SIZE)
    }

    /// Queues one message. Rejects negative indices and payloads that could
    /// never fit; returns `false` without side effects when the ring is full.
    pub fn put(&mut self, atom_type: u32, index: i32, payload: &[u8]) -> bool {
        if index < 0 || payload.len() > self.max_payload() {
            return false;
        }
        let Ok(size) = u32::try_from(payload.len()) else {
            return false;
        };
        let header = AtomHeader {
            size,
            atom_type,
            index,
        };
        self.ring.try_write(&header.to_bytes());
        self.ring.try_write(payload);
        self.ring.commit_write()
    }

    /// Reads the next message into `payload`.
    ///
    /// `Ok(None)` means no complete message is available. A message larger than
    /// `payload` is consumed and reported as [`AtomReadError::TooLarge`].
    ///
    /// Headers and payloads are committed together, so a header without its
    /// payload means the framing is lost. Everything left in the ring is
    /// discarded and [`AtomReadError::Truncated`] is returned once.
    pub fn try_read(&mut self, payload: &mut [u8]) -> Result<Option<AtomHeader>, AtomReadError> {
        let mut raw = [0u8; ATOM_HEADER_SIZE];
        if !self.ring.try_peek(&mut raw) {
            return Ok(None);
        }
        let header = AtomHeader::from_bytes(raw);
        let size = header.size as usize;
        let readable = self.ring.readable_len();
        if readable < ATOM_HEADER_SIZE + size {
            self.ring.skip(readable);
            return Err(AtomReadError::Truncated);
        }
        self.ring.skip(ATOM_HEADER_SIZE);
        if size > payload.len() {
            self.ring.skip(size);
            return Err(AtomReadError::TooLarge {
                size,
                max: payload.len(),
            });
        }
        self.ring.try_read(&mut payload[..size]);
        Ok(Some(header))
    }

    pub fn is_data_available(&self) -> bool {
        self.ring.is_data_available()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }

    pub fn overflow_count(&self) -> u64 {
        self.ring.overflow_count()
    }
}

/// Lock-protected structured ring with a process-unique id.
///
/// The id orders lock acquisition in [`drain_swap`](Self::drain_swap), so two
/// rings draining into each other from different threads cannot deadlock.
#[derive(Debug)]
pub struct SharedAtomRing {
    id: u64,
    inner: Mutex<AtomRingBuffer>,
    dropped: OverflowCounter,
}

impl SharedAtomRing {
    pub fn new(size: usize) -> Self {
        Self {
            id: NEXT_RING_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(AtomRingBuffer::new(size)),
            dropped: OverflowCounter::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Blocking put for non-RT writers.
    pub fn put(&self, atom_type: u32, index: i32, payload: &[u8]) -> bool {
        self.inner.lock().put(atom_type, index, payload)
    }

    /// Locks the ring for reading.
    pub fn lock(&self) -> MutexGuard<'_, AtomRingBuffer> {
        self.inner.lock()
    }

    /// Moves all queued messages into `dest` in one step and empties `self`.
    ///
    /// Both rings must have the same size. Whatever `dest` held before is
    /// discarded, so callers drain into a ring they have already read out.
    pub fn drain_swap(&self, dest: &SharedAtomRing) -> bool {
        if self.id == dest.id {
            return false;
        }
        let (mut source, mut target) = if self.id < dest.id {
            let source = self.inner.lock();
            (source, dest.inner.lock())
        } else {
            let target = dest.inner.lock();
            (self.inner.lock(), target)
        };
        if source.size() != target.size() {
            tracing::warn!(
                source = source.size(),
                dest = target.size(),
                "refusing to swap rings of different sizes"
            );
            return false;
        }
        mem::swap(&mut *source, &mut *target);
        source.clear();
        true
    }

    /// Messages the real-time writer could not queue, because the ring was
    /// either locked or full.
    pub fn dropped(&self) -> &OverflowCounter {
        &self.dropped
    }
}

impl Drop for SharedAtomRing {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        debug_assert!(
            !self.inner.get_mut().is_data_available(),
            "structured ring {} dropped with unread messages",
            self.id
        );
    }
}

/// Audio-thread writer for a [`SharedAtomRing`]. Only ever try-locks.
#[derive(Debug, Clone)]
pub struct AtomRtWriter {
    ring: Arc<SharedAtomRing>,
}

impl AtomRtWriter {
    pub fn new(ring: Arc<SharedAtomRing>) -> Self {
        Self { ring }
    }

    /// Queues a message unless the ring is locked or full.
    pub fn try_put(&self, atom_type: u32, index: i32, payload: &[u8]) -> bool {
        let queued = self
            .ring
            .inner
            .try_lock()
            .is_some_and(|mut ring| ring.put(atom_type, index, payload));
        if !queued {
            self.ring.dropped.increment();
        }
        queued
    }
}
