//! Geiger pulse edge counter
//!
//! The counter is the trust root for every dose figure on the device. It is
//! written only from the pulse-sense edge interrupt and read by three
//! consumers (aggregator, watcher, event log) on independent cadences. Each
//! consumer owns a [`CounterCursor`] holding its private "last seen" value,
//! so deltas taken by one consumer never disturb another.
//!
//! The count is a single aligned 32-bit word: loads are single reads and the
//! interrupt is the only writer, so no lock is needed on the hot path.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::trace;

/// Passive bias control of the pulse-sense input.
///
/// After a tube discharge the input conditioning network must be pulled
/// away from its trigger polarity for a moment, or the tail of the pulse
/// re-triggers the edge detector.
pub trait SenseLine {
    /// Switch the passive bias to the inactive polarity.
    fn quench(&mut self);

    /// Restore the passive bias configured at init.
    fn release(&mut self);
}

/// Cumulative tube discharges since boot.
pub struct PulseCounter {
    count: AtomicU32,
    new_data: AtomicBool,
}

impl PulseCounter {
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            new_data: AtomicBool::new(false),
        }
    }

    /// Edge interrupt body.
    ///
    /// Load-then-store instead of `fetch_add`: this is the only writer, and
    /// the plain sequence also works on cores without atomic read-modify-write.
    pub fn on_edge<S: SenseLine>(&self, sense: &mut S) {
        sense.quench();
        let next = self.count.load(Ordering::Relaxed).wrapping_add(1);
        self.count.store(next, Ordering::Release);
        self.new_data.store(true, Ordering::Release);
        sense.release();
    }

    /// Total pulses since boot.
    pub fn get_count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// Whether pulses arrived since the last [`take_new_data`](Self::take_new_data),
    /// without clearing the flag.
    pub fn has_new_data(&self) -> bool {
        self.new_data.load(Ordering::Acquire)
    }

    /// Consume the "new data" flag. Called once per main-loop pass so that
    /// logging and notification work stays out of the interrupt.
    pub fn take_new_data(&self) -> bool {
        let pending = self.new_data.swap(false, Ordering::AcqRel);
        if pending {
            trace!("PCNT: total pulses {}", self.get_count());
        }
        pending
    }
}

impl Default for PulseCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// One consumer's view of the pulse counter.
///
/// Deltas use wrapping subtraction, which stays correct across a single
/// 32-bit wrap of the counter. Two wraps between reads are assumed
/// unreachable: at 1000 cps a wrap takes ~50 days, and every consumer reads
/// at least hourly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterCursor {
    last_seen: u32,
}

impl CounterCursor {
    /// Start tracking from the counter's current value.
    pub fn new(counter: &PulseCounter) -> Self {
        Self {
            last_seen: counter.get_count(),
        }
    }

    /// Pulses since the previous call, advancing the cursor.
    pub fn advance(&mut self, counter: &PulseCounter) -> u32 {
        let now = counter.get_count();
        let delta = now.wrapping_sub(self.last_seen);
        self.last_seen = now;
        delta
    }

    /// Pulses since the last advance, leaving the cursor where it is.
    pub fn peek(&self, counter: &PulseCounter) -> u32 {
        counter.get_count().wrapping_sub(self.last_seen)
    }

    pub fn last_seen(&self) -> u32 {
        self.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSense {
        quenched: bool,
        quench_calls: u32,
        release_calls: u32,
    }

    impl SenseLine for RecordingSense {
        fn quench(&mut self) {
            self.quenched = true;
            self.quench_calls += 1;
        }

        fn release(&mut self) {
            self.quenched = false;
            self.release_calls += 1;
        }
    }

    #[test]
    fn test_edge_increments_by_one_and_restores_bias() {
        let counter = PulseCounter::new();
        let mut sense = RecordingSense::default();

        counter.on_edge(&mut sense);
        counter.on_edge(&mut sense);

        assert_eq!(counter.get_count(), 2);
        assert_eq!(sense.quench_calls, 2);
        assert_eq!(sense.release_calls, 2);
        assert!(!sense.quenched, "bias must be restored after each edge");
    }

    #[test]
    fn test_new_data_flag_is_consumed_once() {
        let counter = PulseCounter::new();
        let mut sense = RecordingSense::default();

        assert!(!counter.take_new_data());
        counter.on_edge(&mut sense);
        assert!(counter.has_new_data());
        assert!(counter.take_new_data());
        assert!(!counter.take_new_data());
    }

    #[test]
    fn test_cursors_are_independent() {
        let counter = PulseCounter::new();
        let mut sense = RecordingSense::default();
        let mut fast = CounterCursor::new(&counter);
        let mut slow = CounterCursor::new(&counter);

        for _ in 0..5 {
            counter.on_edge(&mut sense);
        }
        assert_eq!(fast.advance(&counter), 5);

        for _ in 0..3 {
            counter.on_edge(&mut sense);
        }
        assert_eq!(fast.advance(&counter), 3);
        assert_eq!(slow.peek(&counter), 8);
        assert_eq!(slow.advance(&counter), 8);
        assert_eq!(slow.advance(&counter), 0);
    }

    #[test]
    fn test_cursor_delta_survives_single_wrap() {
        let counter = PulseCounter {
            count: AtomicU32::new(u32::MAX - 1),
            new_data: AtomicBool::new(false),
        };
        let mut sense = RecordingSense::default();
        let mut cursor = CounterCursor::new(&counter);

        for _ in 0..4 {
            counter.on_edge(&mut sense);
        }

        assert_eq!(counter.get_count(), 2);
        assert_eq!(cursor.advance(&counter), 4);
    }
}
