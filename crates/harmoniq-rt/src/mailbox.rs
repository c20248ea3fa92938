use std::sync::Arc;

use parking_lot::Mutex;

use crate::diag::OverflowCounter;

/// Slot count used for UI/OSC to audio-thread note and CC traffic.
pub const DEFAULT_MAILBOX_SLOTS: usize = 512;

/// Three-byte message stored in a mailbox slot. A zero `status` marks an empty slot.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MailboxEntry {
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl MailboxEntry {
    pub const fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            status,
            data1,
            data2,
        }
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.status == 0
    }
}

/// Fixed table of `N` triples.
///
/// The last slot always stays empty and terminates reads, so at most `N - 1`
/// entries are held at once.
#[derive(Clone, Debug)]
pub struct MailboxQueue<const N: usize> {
    slots: [MailboxEntry; N],
    cursor: usize,
    full: bool,
}

impl<const N: usize> Default for MailboxQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> MailboxQueue<N> {
    pub const fn new() -> Self {
        assert!(N >= 2, "a mailbox needs at least one usable slot");
        Self {
            slots: [MailboxEntry::new(0, 0, 0); N],
            cursor: 0,
            full: false,
        }
    }

    /// Number of entries the queue can hold.
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn is_empty(&self) -> bool {
        self.slots[..N - 1].iter().all(MailboxEntry::is_empty)
    }

    /// Stores a triple in the first free slot. Fails when full or when `status` is zero.
    pub fn put(&mut self, status: u8, data1: u8, data2: u8) -> bool {
        if status == 0 || self.full {
            return false;
        }
        let last = N - 2;
        for (index, slot) in self.slots[..=last].iter_mut().enumerate() {
            if slot.is_empty() {
                *slot = MailboxEntry::new(status, data1, data2);
                self.full = index == last;
                return true;
            }
        }
        false
    }

    /// Takes the entry under the read cursor. Rewinds the cursor once the data runs out.
    pub fn get(&mut self) -> Option<MailboxEntry> {
        let entry = self.slots[self.cursor];
        if entry.is_empty() {
            self.cursor = 0;
            return None;
        }
        self.slots[self.cursor] = MailboxEntry::default();
        self.cursor += 1;
        self.full = false;
        Some(entry)
    }

    pub fn clear(&mut self) {
        self.slots = [MailboxEntry::default(); N];
        self.cursor = 0;
        self.full = false;
    }

    /// Moves the whole table into `dest` without waiting for its lock.
    ///
    /// Fails if `dest` is locked or still holds unread entries; `self` is left
    /// untouched in that case.
    pub fn try_drain_into(&mut self, dest: &SharedMailbox<N>) -> bool {
        let Some(mut guard) = dest.queue.try_lock() else {
            return false;
        };
        if !guard.is_empty() {
            return false;
        }
        *guard = self.clone();
        self.clear();
        true
    }
}

/// Mailbox guarded by a lock, shared between a non-RT writer and the audio thread.
#[derive(Debug, Default)]
pub struct SharedMailbox<const N: usize> {
    queue: Mutex<MailboxQueue<N>>,
    rejected: OverflowCounter,
}

impl<const N: usize> SharedMailbox<N> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(MailboxQueue::new()),
            rejected: OverflowCounter::new(),
        }
    }

    /// Blocking put for non-RT threads.
    pub fn put(&self, status: u8, data1: u8, data2: u8) -> bool {
        let stored = self.queue.lock().put(status, data1, data2);
        if !stored {
            self.rejected.increment();
        }
        stored
    }

    /// Moves everything queued here into `dest` if the lock is free and `dest`
    /// has been fully read.
    pub fn try_take_into(&self, dest: &mut MailboxQueue<N>) -> bool {
        if !dest.is_empty() {
            return false;
        }
        let Some(mut guard) = self.queue.try_lock() else {
            return false;
        };
        if guard.is_empty() {
            return false;
        }
        *dest = guard.clone();
        dest.cursor = 0;
        guard.clear();
        true
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Discards everything queued on the shared side.
    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    pub fn rejected(&self) -> &OverflowCounter {
        &self.rejected
    }
}

impl<const N: usize> Drop for SharedMailbox<N> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        debug_assert!(
            self.queue.get_mut().is_empty(),
            "mailbox dropped with unread entries"
        );
    }
}

/// Audio-thread end of a [`SharedMailbox`]. Never blocks.
#[derive(Debug)]
pub struct MailboxRtReader<const N: usize> {
    shared: Arc<SharedMailbox<N>>,
    local: MailboxQueue<N>,
}

impl<const N: usize> MailboxRtReader<N> {
    pub fn new(shared: Arc<SharedMailbox<N>>) -> Self {
        Self {
            shared,
            local: MailboxQueue::new(),
        }
    }

    /// Next pending entry, pulling a new batch from the shared side when the
    /// local copy is exhausted and the lock happens to be free.
    pub fn pop(&mut self) -> Option<MailboxEntry> {
        if let Some(entry) = self.local.get() {
            return Some(entry);
        }
        if self.shared.try_take_into(&mut self.local) {
            return self.local.get();
        }
        None
    }
}

impl<const N: usize> Drop for MailboxRtReader<N> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        debug_assert!(
            self.local.is_empty(),
            "mailbox reader dropped with unread entries"
        );
    }
}
