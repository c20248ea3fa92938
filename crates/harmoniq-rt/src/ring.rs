use std::cell::UnsafeCell;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::diag::OverflowCounter;

pub const SMALL_RING_SIZE: usize = 4 * 1024;
pub const MEDIUM_RING_SIZE: usize = 16 * 1024;
pub const LARGE_RING_SIZE: usize = 64 * 1024;

/// Storage shared by the producer and consumer halves.
///
/// `head` is only stored by the producer and `tail` only by the consumer. Bytes in
/// `[tail, head)` belong to the consumer, everything else to the producer.
struct RingStorage {
    data: Box<[UnsafeCell<u8>]>,
    head: AtomicUsize,
    tail: AtomicUsize,
    overflows: OverflowCounter,
    underflows: OverflowCounter,
}

// SAFETY: the byte regions touched by each side are disjoint, and ownership of a
// region is handed over through the Release/Acquire pairs on `head` and `tail`.
unsafe impl Sync for RingStorage {}

impl RingStorage {
    fn new(size: usize) -> Self {
        let data = (0..size)
            .map(|_| UnsafeCell::new(0u8))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            data,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            overflows: OverflowCounter::new(),
            underflows: OverflowCounter::new(),
        }
    }

    #[inline]
    fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        UnsafeCell::raw_get(self.data.as_ptr())
    }

    /// # Safety
    /// The caller must own the `bytes.len()` bytes starting at `offset` (wrapping).
    unsafe fn copy_in(&self, offset: usize, bytes: &[u8]) {
        let first = bytes.len().min(self.size() - offset);
        ptr::copy_nonoverlapping(bytes.as_ptr(), self.base().add(offset), first);
        if first < bytes.len() {
            ptr::copy_nonoverlapping(bytes.as_ptr().add(first), self.base(), bytes.len() - first);
        }
    }

    /// # Safety
    /// The caller must own the `out.len()` bytes starting at `offset` (wrapping).
    unsafe fn copy_out(&self, offset: usize, out: &mut [u8]) {
        let first = out.len().min(self.size() - offset);
        ptr::copy_nonoverlapping(self.base().add(offset), out.as_mut_ptr(), first);
        if first < out.len() {
            ptr::copy_nonoverlapping(self.base(), out.as_mut_ptr().add(first), out.len() - first);
        }
    }
}

/// Writing half of a [`RingBuffer`]. Safe to use from the audio callback.
///
/// Writes are tentative until [`commit_write`](Self::commit_write). If any write
/// of a message fails for lack of space the whole message is discarded at commit.
pub struct RingProducer {
    storage: Arc<RingStorage>,
    written: usize,
    invalidate: bool,
}

impl RingProducer {
    /// Free bytes available to the tentative region.
    pub fn writable_len(&self) -> usize {
        let size = self.storage.size();
        let tail = self.storage.tail.load(Ordering::Acquire);
        size - 1 - (self.written + size - tail) % size
    }

    /// Appends `bytes` to the uncommitted message.
    ///
    /// Returns `false` and poisons the pending message when there is not enough room.
    pub fn try_write(&mut self, bytes: &[u8]) -> bool {
        if self.invalidate {
            return false;
        }
        if bytes.is_empty() {
            return true;
        }
        if bytes.len() > self.writable_len() {
            self.invalidate = true;
            self.storage.overflows.increment();
            return false;
        }
        // SAFETY: `writable_len` guarantees the region after `written` is not readable.
        unsafe { self.storage.copy_in(self.written, bytes) };
        self.written = (self.written + bytes.len()) % self.storage.size();
        true
    }

    /// Publishes everything written since the last commit.
    ///
    /// Returns `false` when nothing was pending or when a write failed, in which
    /// case the pending bytes are rolled back and the reader sees nothing.
    pub fn commit_write(&mut self) -> bool {
        let head = self.storage.head.load(Ordering::Relaxed);
        if self.invalidate {
            self.written = head;
            self.invalidate = false;
            return false;
        }
        if self.written == head {
            return false;
        }
        self.storage.head.store(self.written, Ordering::Release);
        true
    }

    /// Whether a write failed since the last commit.
    pub fn is_invalidated(&self) -> bool {
        self.invalidate
    }

    /// Number of messages dropped because the buffer was full.
    pub fn overflow_count(&self) -> u64 {
        self.storage.overflows.get()
    }

    pub fn overflows(&self) -> &OverflowCounter {
        &self.storage.overflows
    }

    pub fn try_write_bool(&mut self, value: bool) -> bool {
        self.try_write(&[u8::from(value)])
    }
}

impl fmt::Debug for RingProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingProducer")
            .field("size", &self.storage.size())
            .field("written", &self.written)
            .field("invalidate", &self.invalidate)
            .finish()
    }
}

/// Reading half of a [`RingBuffer`]. Only ever observes committed data.
pub struct RingConsumer {
    storage: Arc<RingStorage>,
}

impl RingConsumer {
    /// Committed bytes waiting to be read.
    pub fn readable_len(&self) -> usize {
        let size = self.storage.size();
        let head = self.storage.head.load(Ordering::Acquire);
        let tail = self.storage.tail.load(Ordering::Relaxed);
        (head + size - tail) % size
    }

    pub fn is_data_available(&self) -> bool {
        self.readable_len() > 0
    }

    /// Copies `out.len()` bytes without consuming them. No-op if not enough data.
    pub fn try_peek(&self, out: &mut [u8]) -> bool {
        if out.len() > self.readable_len() {
            return false;
        }
        let tail = self.storage.tail.load(Ordering::Relaxed);
        // SAFETY: `[tail, tail + len)` lies inside the committed region.
        unsafe { self.storage.copy_out(tail, out) };
        true
    }

    /// Copies and consumes `out.len()` bytes. No-op if not enough data.
    ///
    /// A read that finds some but not enough committed bytes counts as an underflow.
    pub fn try_read(&mut self, out: &mut [u8]) -> bool {
        if !self.try_peek(out) {
            if self.is_data_available() {
                self.storage.underflows.increment();
            }
            return false;
        }
        self.advance(out.len());
        true
    }

    /// Discards `len` committed bytes.
    pub fn skip(&mut self, len: usize) -> bool {
        if len > self.readable_len() {
            return false;
        }
        self.advance(len);
        true
    }

    /// Reads that asked for more bytes than were committed.
    pub fn underflow_count(&self) -> u64 {
        self.storage.underflows.get()
    }

    pub fn try_read_bool(&mut self) -> Option<bool> {
        let mut byte = [0u8; 1];
        self.try_read(&mut byte).then(|| byte[0] != 0)
    }

    fn advance(&mut self, len: usize) {
        let tail = self.storage.tail.load(Ordering::Relaxed);
        self.storage
            .tail
            .store((tail + len) % self.storage.size(), Ordering::Release);
    }
}

impl Drop for RingConsumer {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        debug_assert!(
            !self.is_data_available(),
            "ring dropped with {} unread bytes",
            self.readable_len()
        );
    }
}

impl fmt::Debug for RingConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingConsumer")
            .field("size", &self.storage.size())
            .field("readable", &self.readable_len())
            .finish()
    }
}

macro_rules! typed_ring_io {
    ($($write:ident / $read:ident => $ty:ty;)*) => {
        impl RingProducer {
            $(
                #[inline]
                pub fn $write(&mut self, value: $ty) -> bool {
                    self.try_write(&value.to_ne_bytes())
                }
            )*
        }

        impl RingConsumer {
            $(
                #[inline]
                pub fn $read(&mut self) -> Option<$ty> {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    self.try_read(&mut bytes).then(|| <$ty>::from_ne_bytes(bytes))
                }
            )*
        }
    };
}

typed_ring_io! {
    try_write_u8 / try_read_u8 => u8;
    try_write_i16 / try_read_i16 => i16;
    try_write_u16 / try_read_u16 => u16;
    try_write_i32 / try_read_i32 => i32;
    try_write_u32 / try_read_u32 => u32;
    try_write_i64 / try_read_i64 => i64;
    try_write_u64 / try_read_u64 => u64;
    try_write_f32 / try_read_f32 => f32;
    try_write_f64 / try_read_f64 => f64;
}

/// Fixed-size single-producer/single-consumer byte ring with tentative writes.
///
/// One byte of storage is always left free to tell a full ring from an empty
/// one, so a ring of `size` bytes holds at most `size - 1` bytes.
pub struct RingBuffer {
    producer: RingProducer,
    consumer: RingConsumer,
}

impl RingBuffer {
    /// Creates a ring with exactly `size` bytes of storage (at least 2).
    pub fn new(size: usize) -> Self {
        let storage = Arc::new(RingStorage::new(size.max(2)));
        Self {
            producer: RingProducer {
                storage: Arc::clone(&storage),
                written: 0,
                invalidate: false,
            },
            consumer: RingConsumer { storage },
        }
    }

    /// Creates a power-of-two sized ring able to hold at least `capacity` bytes.
    pub fn with_min_capacity(capacity: usize) -> Self {
        Self::new((capacity + 1).next_power_of_two())
    }

    pub fn small() -> Self {
        Self::new(SMALL_RING_SIZE)
    }

    pub fn medium() -> Self {
        Self::new(MEDIUM_RING_SIZE)
    }

    pub fn large() -> Self {
        Self::new(LARGE_RING_SIZE)
    }

    pub fn size(&self) -> usize {
        self.producer.storage.size()
    }

    /// Largest number of bytes the ring can hold at once.
    pub fn capacity(&self) -> usize {
        self.size() - 1
    }

    /// Resets all cursors. Storage is kept, nothing is reallocated.
    pub fn clear(&mut self) {
        let storage = &self.producer.storage;
        storage.head.store(0, Ordering::Relaxed);
        storage.tail.store(0, Ordering::Relaxed);
        self.producer.written = 0;
        self.producer.invalidate = false;
    }

    /// Borrows both halves, for use from two scoped threads.
    pub fn split(&mut self) -> (&mut RingProducer, &mut RingConsumer) {
        (&mut self.producer, &mut self.consumer)
    }

    pub fn into_split(self) -> (RingProducer, RingConsumer) {
        (self.producer, self.consumer)
    }

    pub fn producer(&mut self) -> &mut RingProducer {
        &mut self.producer
    }

    pub fn consumer(&mut self) -> &mut RingConsumer {
        &mut self.consumer
    }

    pub fn try_write(&mut self, bytes: &[u8]) -> bool {
        self.producer.try_write(bytes)
    }

    pub fn commit_write(&mut self) -> bool {
        self.producer.commit_write()
    }

    pub fn try_read(&mut self, out: &mut [u8]) -> bool {
        self.consumer.try_read(out)
    }

    pub fn try_peek(&self, out: &mut [u8]) -> bool {
        self.consumer.try_peek(out)
    }

    pub fn skip(&mut self, len: usize) -> bool {
        self.consumer.skip(len)
    }

    pub fn readable_len(&self) -> usize {
        self.consumer.readable_len()
    }

    pub fn writable_len(&self) -> usize {
        self.producer.writable_len()
    }

    pub fn is_data_available(&self) -> bool {
        self.consumer.is_data_available()
    }

    pub fn overflow_count(&self) -> u64 {
        self.producer.overflow_count()
    }

    pub fn underflow_count(&self) -> u64 {
        self.consumer.underflow_count()
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("size", &self.size())
            .field("readable", &self.readable_len())
            .field("written", &self.producer.written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn committed_bytes_round_trip() {
        let mut ring = RingBuffer::new(16);
        assert!(ring.try_write(b"abc"));
        assert!(ring.try_write(b"de"));
        assert!(!ring.is_data_available(), "uncommitted bytes must stay hidden");
        assert!(ring.commit_write());
        let mut out = [0u8; 5];
        assert!(ring.try_read(&mut out));
        assert_eq!(&out, b"abcde");
        assert!(!ring.is_data_available());
    }

    #[test]
    fn failed_write_discards_the_whole_message() {
        let mut ring = RingBuffer::new(8);
        assert!(ring.try_write(b"xy"));
        assert!(ring.commit_write());

        assert!(ring.try_write(b"1234"));
        assert!(!ring.try_write(b"5678"));
        assert!(!ring.try_write(b"9"), "poisoned message rejects later parts");
        assert!(!ring.commit_write());
        assert_eq!(ring.readable_len(), 2);
        assert_eq!(ring.overflow_count(), 1);

        let mut out = [0u8; 2];
        assert!(ring.try_read(&mut out));
        assert_eq!(&out, b"xy");
        assert!(ring.try_write(b"after"));
        assert!(ring.commit_write());
        assert_eq!(ring.readable_len(), 5);
        ring.clear();
    }

    #[test]
    fn empty_commit_reports_nothing_written() {
        let mut ring = RingBuffer::new(8);
        assert!(!ring.commit_write());
    }

    #[test]
    fn short_reads_count_only_when_data_is_pending() {
        let mut ring = RingBuffer::new(8);
        let mut out = [0u8; 4];
        assert!(!ring.try_read(&mut out));
        assert_eq!(ring.underflow_count(), 0);

        assert!(ring.try_write(b"ab"));
        assert!(ring.commit_write());
        assert!(!ring.try_read(&mut out));
        assert_eq!(ring.underflow_count(), 1);
        assert_eq!(ring.readable_len(), 2);
        ring.clear();
    }

    #[test]
    fn usable_capacity_is_one_less_than_size() {
        let mut ring = RingBuffer::new(8);
        assert_eq!(ring.capacity(), 7);
        assert!(ring.try_write(&[1; 7]));
        assert!(ring.commit_write());
        assert_eq!(ring.writable_len(), 0);
        assert!(!ring.try_write(&[1]));
        assert!(!ring.commit_write());
        ring.clear();
    }

    #[test]
    fn data_wraps_around_the_end() {
        let mut ring = RingBuffer::new(8);
        let mut out = [0u8; 5];
        for round in 0..10u8 {
            let message = [round; 5];
            assert!(ring.try_write(&message));
            assert!(ring.commit_write());
            assert!(ring.try_read(&mut out));
            assert_eq!(out, message);
        }
    }

    #[test]
    fn peek_does_not_consume() {
        let mut ring = RingBuffer::new(8);
        assert!(ring.producer().try_write_u16(0xBEEF));
        assert!(ring.commit_write());
        let mut peeked = [0u8; 2];
        assert!(ring.try_peek(&mut peeked));
        assert_eq!(ring.readable_len(), 2);
        assert_eq!(ring.consumer().try_read_u16(), Some(0xBEEF));
    }

    #[test]
    fn short_read_is_a_no_op() {
        let mut ring = RingBuffer::new(8);
        assert!(ring.try_write(b"ab"));
        assert!(ring.commit_write());
        let mut out = [0u8; 3];
        assert!(!ring.try_read(&mut out));
        assert_eq!(ring.readable_len(), 2);
        ring.clear();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "ring dropped with 4 unread bytes")]
    fn dropping_unread_data_is_caught() {
        let mut ring = RingBuffer::new(8);
        assert!(ring.try_write(b"lost"));
        assert!(ring.commit_write());
    }

    #[test]
    fn drained_split_halves_drop_quietly() {
        let (mut producer, mut consumer) = RingBuffer::new(8).into_split();
        assert!(producer.try_write(b"kept"));
        assert!(producer.commit_write());
        drop(producer);
        let mut out = [0u8; 4];
        assert!(consumer.try_read(&mut out));
        assert_eq!(&out, b"kept");
    }

    #[test]
    fn typed_values_round_trip() {
        let mut ring = RingBuffer::new(64);
        let (producer, consumer) = ring.split();
        assert!(producer.try_write_bool(true));
        assert!(producer.try_write_i32(-42));
        assert!(producer.try_write_f32(0.25));
        assert!(producer.try_write_u64(u64::MAX));
        assert!(producer.try_write_f64(-1.5));
        assert!(producer.commit_write());
        assert_eq!(consumer.try_read_bool(), Some(true));
        assert_eq!(consumer.try_read_i32(), Some(-42));
        assert_eq!(consumer.try_read_f32(), Some(0.25));
        assert_eq!(consumer.try_read_u64(), Some(u64::MAX));
        assert_eq!(consumer.try_read_f64(), Some(-1.5));
        assert_eq!(consumer.try_read_u8(), None);
    }

    #[test]
    fn clear_resets_cursors() {
        let mut ring = RingBuffer::with_min_capacity(10);
        assert_eq!(ring.size(), 16);
        assert!(ring.try_write(b"pending"));
        assert!(ring.commit_write());
        assert!(ring.try_write(b"tentative"));
        ring.clear();
        assert_eq!(ring.readable_len(), 0);
        assert_eq!(ring.writable_len(), 15);
        assert!(!ring.commit_write());
    }

    proptest! {
        #[test]
        fn writes_that_fit_are_read_back_in_order(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..24), 0..12),
        ) {
            let mut ring = RingBuffer::new(256);
            let expected: Vec<u8> = chunks.iter().flatten().copied().collect();
            for chunk in &chunks {
                prop_assert!(ring.try_write(chunk));
            }
            prop_assert_eq!(ring.commit_write(), !expected.is_empty());
            let mut out = vec![0u8; expected.len()];
            prop_assert!(ring.try_read(&mut out));
            prop_assert_eq!(out, expected);
        }

        #[test]
        fn overflowing_message_leaves_cursors_untouched(
            prefix in 0usize..32,
            parts in proptest::collection::vec(1usize..16, 1..8),
        ) {
            let mut ring = RingBuffer::new(32);
            let total: usize = parts.iter().sum();
            prop_assume!(prefix < ring.capacity());
            prop_assume!(total > ring.capacity() - prefix);
            prop_assert!(ring.try_write(&vec![7u8; prefix]));
            ring.commit_write();
            let readable = ring.readable_len();
            let writable = ring.writable_len();
            for part in &parts {
                ring.try_write(&vec![1u8; *part]);
            }
            let committed = ring.commit_write();
            let cursors = (ring.readable_len(), ring.writable_len());
            ring.clear();
            prop_assert!(!committed);
            prop_assert_eq!(cursors, (readable, writable));
        }
    }
}
