use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts silent failures on the real-time path.
///
/// Incrementing is a single relaxed atomic add, so it is safe to call from the
/// audio callback. Reading and logging the value is left to the non-RT side.
#[derive(Debug, Default)]
pub struct OverflowCounter {
    count: AtomicU64,
}

impl OverflowCounter {
    pub const fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Non-RT helper that turns counter deltas into log lines.
///
/// Each channel is identified by a static name; only growth since the previous
/// call is reported so a steady overflow produces one warning per poll.
#[derive(Debug, Default)]
pub struct OverflowReporter {
    seen: HashMap<&'static str, u64>,
}

impl OverflowReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of new overflows on `channel` since the last call.
    pub fn observe(&mut self, channel: &'static str, counter: &OverflowCounter) -> u64 {
        let current = counter.get();
        let previous = self.seen.insert(channel, current).unwrap_or(0);
        let delta = current.saturating_sub(previous);
        if delta > 0 {
            tracing::warn!(
                target: "harmoniq_rt::overflow",
                channel,
                dropped = delta,
                total = current,
                "real-time queue overflow"
            );
        }
        delta
    }
}
