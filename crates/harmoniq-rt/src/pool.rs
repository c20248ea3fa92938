use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::diag::OverflowCounter;

const NIL: u32 = u32::MAX;
const TRY_LOCK_ATTEMPTS: usize = 8;

/// Sizing of a [`PoolList`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Slots linked into the free list at construction.
    pub min_slots: usize,
    /// Hard cap. Appends beyond it are dropped.
    pub max_slots: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_slots: 512,
            max_slots: 512,
        }
    }
}

struct Slot<T> {
    value: Option<T>,
    next: u32,
}

/// Bookkeeping guarded by the pool lock: the pending chain and the free list.
struct PendingChain {
    head: u32,
    tail: u32,
    len: usize,
    free: u32,
    warmed: usize,
}

struct PoolShared<T> {
    slots: Box<[UnsafeCell<Slot<T>>]>,
    chain: Mutex<PendingChain>,
    dropped: OverflowCounter,
    contended: OverflowCounter,
}

// SAFETY: a slot is accessed either by the holder of `chain` (free and pending
// slots) or by the single `PoolConsumer` (live slots). Slots only change hands
// while `chain` is held.
unsafe impl<T: Send> Sync for PoolShared<T> {}

impl<T> PoolShared<T> {
    /// # Safety
    /// The caller must own slot `index` as described on the `Sync` impl.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    unsafe fn slot(&self, index: u32) -> &mut Slot<T> {
        &mut *self.slots[index as usize].get()
    }
}

/// Arena-backed list with a real-time append side and a non-RT splice side.
///
/// Values appended on the audio thread land on a pending chain. The consumer
/// moves the whole pending chain to its live chain in one step with
/// [`PoolConsumer::try_splice`], then iterates or drains it at leisure.
pub struct PoolList;

impl PoolList {
    #[allow(clippy::new_ret_no_self)]
    pub fn new<T: Send>(config: PoolConfig) -> (PoolProducer<T>, PoolConsumer<T>) {
        let max = config.max_slots.clamp(1, NIL as usize - 1);
        let min = config.min_slots.min(max);
        let slots = (0..max)
            .map(|index| {
                UnsafeCell::new(Slot {
                    value: None,
                    next: if index + 1 < min { (index + 1) as u32 } else { NIL },
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let shared = Arc::new(PoolShared {
            slots,
            chain: Mutex::new(PendingChain {
                head: NIL,
                tail: NIL,
                len: 0,
                free: if min > 0 { 0 } else { NIL },
                warmed: min,
            }),
            dropped: OverflowCounter::new(),
            contended: OverflowCounter::new(),
        });
        (
            PoolProducer {
                shared: Arc::clone(&shared),
            },
            PoolConsumer {
                shared,
                head: NIL,
                tail: NIL,
                len: 0,
            },
        )
    }
}

/// Snapshot of pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub capacity: usize,
    pub warmed: usize,
    pub pending: usize,
    pub dropped: u64,
    pub contended: u64,
}

/// Real-time end of a pool list.
pub struct PoolProducer<T> {
    shared: Arc<PoolShared<T>>,
}

impl<T: Send> PoolProducer<T> {
    /// Links `value` onto the pending chain.
    ///
    /// Never blocks and never allocates. If the pool is exhausted, or the
    /// consumer holds the lock for longer than a few attempts, the value is
    /// dropped, the matching counter is bumped and `false` is returned.
    pub fn append_rt(&mut self, value: T) -> bool {
        let Some(mut chain) = self.acquire() else {
            self.shared.contended.increment();
            return false;
        };

        let index = if chain.free != NIL {
            let index = chain.free;
            // SAFETY: free slots are owned by the lock holder.
            chain.free = unsafe { self.shared.slot(index).next };
            index
        } else if chain.warmed < self.shared.slots.len() {
            let index = chain.warmed as u32;
            chain.warmed += 1;
            index
        } else {
            drop(chain);
            self.shared.dropped.increment();
            return false;
        };

        // SAFETY: `index` was just taken off the free list (or was never handed
        // out) and the pending tail is owned by the lock holder.
        unsafe {
            let slot = self.shared.slot(index);
            slot.value = Some(value);
            slot.next = NIL;
            if chain.tail == NIL {
                chain.head = index;
            } else {
                self.shared.slot(chain.tail).next = index;
            }
        }
        chain.tail = index;
        chain.len += 1;
        true
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.get()
    }

    fn acquire(&self) -> Option<parking_lot::MutexGuard<'_, PendingChain>> {
        for _ in 0..TRY_LOCK_ATTEMPTS {
            if let Some(guard) = self.shared.chain.try_lock() {
                return Some(guard);
            }
            std::hint::spin_loop();
        }
        None
    }
}

impl<T> fmt::Debug for PoolProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolProducer")
            .field("capacity", &self.shared.slots.len())
            .finish_non_exhaustive()
    }
}

/// Non-RT end of a pool list. Owns the live chain.
pub struct PoolConsumer<T> {
    shared: Arc<PoolShared<T>>,
    head: u32,
    tail: u32,
    len: usize,
}

impl<T: Send> PoolConsumer<T> {
    /// Moves the pending chain to the end of the live chain if the lock is free.
    pub fn try_splice(&mut self) -> bool {
        let shared = Arc::clone(&self.shared);
        let Some(mut chain) = shared.chain.try_lock() else {
            return false;
        };
        self.splice_locked(&mut chain);
        true
    }

    /// Blocking variant of [`try_splice`](Self::try_splice).
    pub fn splice(&mut self) {
        let shared = Arc::clone(&self.shared);
        let mut chain = shared.chain.lock();
        self.splice_locked(&mut chain);
    }

    fn splice_locked(&mut self, chain: &mut PendingChain) {
        if chain.head == NIL {
            return;
        }
        if self.tail == NIL {
            self.head = chain.head;
        } else {
            // SAFETY: the live tail belongs to the consumer and the lock is held.
            unsafe { self.shared.slot(self.tail).next = chain.head };
        }
        self.tail = chain.tail;
        self.len += chain.len;
        chain.head = NIL;
        chain.tail = NIL;
        chain.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Forward iterator over the live chain.
    pub fn iter(&self) -> LiveIter<'_, T> {
        LiveIter {
            shared: &self.shared,
            next: self.head,
        }
    }

    /// Takes every live value in order and returns the slots to the free list.
    pub fn drain_live(&mut self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while cursor != NIL {
            // SAFETY: live slots belong to the consumer.
            let slot = unsafe { self.shared.slot(cursor) };
            if let Some(value) = slot.value.take() {
                values.push(value);
            }
            cursor = slot.next;
        }
        self.release_live();
        values
    }

    /// Drops every pending and live value.
    pub fn clear(&mut self) {
        self.splice();
        let mut cursor = self.head;
        while cursor != NIL {
            // SAFETY: live slots belong to the consumer.
            let slot = unsafe { self.shared.slot(cursor) };
            slot.value = None;
            cursor = slot.next;
        }
        self.release_live();
    }

    pub fn stats(&self) -> PoolStats {
        let chain = self.shared.chain.lock();
        PoolStats {
            capacity: self.shared.slots.len(),
            warmed: chain.warmed,
            pending: chain.len,
            dropped: self.shared.dropped.get(),
            contended: self.shared.contended.get(),
        }
    }

    pub fn dropped_counter(&self) -> &OverflowCounter {
        &self.shared.dropped
    }

    pub fn contended_counter(&self) -> &OverflowCounter {
        &self.shared.contended
    }

    fn release_live(&mut self) {
        if self.head == NIL {
            return;
        }
        let mut chain = self.shared.chain.lock();
        // SAFETY: the live tail belongs to the consumer; after relinking the whole
        // live chain becomes free-list property under the held lock.
        unsafe { self.shared.slot(self.tail).next = chain.free };
        chain.free = self.head;
        self.head = NIL;
        self.tail = NIL;
        self.len = 0;
    }
}

impl<T> Drop for PoolConsumer<T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let pending = self.shared.chain.lock().len;
        debug_assert!(
            self.len == 0 && pending == 0,
            "pool list dropped with {} live and {pending} pending values",
            self.len
        );
    }
}

impl<T> fmt::Debug for PoolConsumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConsumer")
            .field("live", &self.len)
            .finish_non_exhaustive()
    }
}

pub struct LiveIter<'a, T> {
    shared: &'a PoolShared<T>,
    next: u32,
}

impl<'a, T> Iterator for LiveIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next != NIL {
            // SAFETY: the iterator borrows the consumer, which owns the live chain.
            let slot: &'a Slot<T> = unsafe { &*self.shared.slots[self.next as usize].get() };
            self.next = slot.next;
            if let Some(value) = slot.value.as_ref() {
                return Some(value);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn config(min: usize, max: usize) -> PoolConfig {
        PoolConfig {
            min_slots: min,
            max_slots: max,
        }
    }

    #[test]
    fn splice_moves_pending_values_in_order() {
        let (mut producer, mut consumer) = PoolList::new::<u32>(config(4, 8));
        for value in 0..5 {
            assert!(producer.append_rt(value));
        }
        assert!(consumer.is_empty());
        assert!(consumer.try_splice());
        assert_eq!(consumer.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(consumer.stats().pending, 0);
        consumer.clear();
    }

    #[test]
    fn splice_appends_to_existing_live_chain() {
        let (mut producer, mut consumer) = PoolList::new::<u32>(config(8, 8));
        producer.append_rt(1);
        consumer.splice();
        producer.append_rt(2);
        producer.append_rt(3);
        consumer.splice();
        assert_eq!(consumer.drain_live(), vec![1, 2, 3]);
    }

    #[test]
    fn growth_stops_at_max_and_drops_newest() {
        let (mut producer, mut consumer) = PoolList::new::<u32>(config(2, 3));
        assert!(producer.append_rt(1));
        assert!(producer.append_rt(2));
        assert!(producer.append_rt(3));
        assert!(!producer.append_rt(4));
        assert_eq!(producer.dropped(), 1);
        consumer.splice();
        assert_eq!(consumer.drain_live(), vec![1, 2, 3]);
        assert_eq!(consumer.stats().warmed, 3);
    }

    #[test]
    fn drained_slots_are_reused() {
        let (mut producer, mut consumer) = PoolList::new::<u32>(config(2, 2));
        for round in 0..10 {
            assert!(producer.append_rt(round));
            assert!(producer.append_rt(round + 100));
            consumer.splice();
            assert_eq!(consumer.drain_live(), vec![round, round + 100]);
        }
        assert_eq!(producer.dropped(), 0);
    }

    #[test]
    fn try_splice_fails_while_locked() {
        let (mut producer, mut consumer) = PoolList::new::<u32>(config(4, 4));
        producer.append_rt(7);
        {
            let shared = Arc::clone(&consumer.shared);
            let _held = shared.chain.lock();
            assert!(!consumer.try_splice());
        }
        assert!(consumer.try_splice());
        assert_eq!(consumer.drain_live(), vec![7]);
    }

    #[test]
    fn contended_append_is_dropped_and_counted() {
        let (mut producer, mut consumer) = PoolList::new::<u32>(config(4, 4));
        {
            let _held = consumer.shared.chain.lock();
            assert!(!producer.append_rt(1));
        }
        assert_eq!(consumer.stats().contended, 1);
        consumer.clear();
    }

    #[test]
    fn clear_takes_pending_values_too() {
        let (mut producer, mut consumer) = PoolList::new::<String>(config(4, 4));
        producer.append_rt("a".into());
        consumer.splice();
        producer.append_rt("b".into());
        consumer.clear();
        assert!(consumer.is_empty());
        assert_eq!(consumer.stats().pending, 0);
    }
}
