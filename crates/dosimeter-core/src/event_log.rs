//! Hourly event log
//!
//! Every `EVENT_LOG_PERIOD_S` the pulse delta of the closing period is
//! appended as a 24-bit [`EventLogEntry`]. The queue holds
//! [`EVENT_LOG_CAPACITY`] entries (about 45 days); when it is full the
//! oldest entry is discarded to make room, and the loss is counted.
//!
//! ## Reading
//!
//! [`EventQueue::get_next_event`] returns, in order of preference:
//! - the oldest finalized entry, high bit clear
//! - the running delta of the open period, high bit set
//! - exactly `0x8000_0000` when no period was ever anchored to UTC

use heapless::Deque;
use log::{debug, info};

use crate::config::EVENT_LOG_CAPACITY;
use crate::pulse_counter::{CounterCursor, PulseCounter};

/// Marks a provisional (open-period) value.
pub const PROVISIONAL_FLAG: u32 = 0x8000_0000;

/// Largest delta an entry can hold.
pub const EVENT_ENTRY_MAX: u32 = 0x00FF_FFFF;

/// One period's pulse delta, packed big-endian into 24 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventLogEntry([u8; 3]);

impl EventLogEntry {
    /// Pack `delta`, saturating at [`EVENT_ENTRY_MAX`].
    pub fn from_delta(delta: u32) -> Self {
        let [_, msb, mid, lsb] = delta.min(EVENT_ENTRY_MAX).to_be_bytes();
        Self([msb, mid, lsb])
    }

    pub fn value(self) -> u32 {
        let [msb, mid, lsb] = self.0;
        u32::from_be_bytes([0, msb, mid, lsb])
    }

    pub fn to_bytes(self) -> [u8; 3] {
        self.0
    }
}

pub struct EventQueue {
    entries: Deque<EventLogEntry, EVENT_LOG_CAPACITY>,
    cursor: CounterCursor,
    last_closed_utc: u64,
    evicted_total: u32,
}

impl EventQueue {
    pub fn new(counter: &PulseCounter) -> Self {
        Self {
            entries: Deque::new(),
            cursor: CounterCursor::new(counter),
            last_closed_utc: 0,
            evicted_total: 0,
        }
    }

    /// Open the first period at `now_utc` (0 if UTC is not known yet).
    pub fn start(&mut self, counter: &PulseCounter, now_utc: u64) {
        critical_section::with(|_| {
            self.cursor = CounterCursor::new(counter);
            self.last_closed_utc = now_utc;
        });
        debug!("EVQ: started at {}", now_utc);
    }

    /// Finalize the open period and append it. Returns the stored entry.
    pub fn close_period(&mut self, counter: &PulseCounter, now_utc: u64) -> EventLogEntry {
        let delta = critical_section::with(|_| {
            let delta = self.cursor.advance(counter);
            self.last_closed_utc = now_utc;
            delta
        });

        if self.entries.is_full() {
            self.entries.pop_front();
            self.evicted_total = self.evicted_total.wrapping_add(1);
            info!("EVQ: full, oldest event discarded ({} total)", self.evicted_total);
        }

        let entry = EventLogEntry::from_delta(delta);
        // Cannot fail: a slot was freed above if needed.
        let _ = self.entries.push_back(entry);
        debug!("EVQ: closed period with {} counts", entry.value());
        entry
    }

    /// Pop the oldest finalized entry, or report the open period.
    pub fn get_next_event(&mut self, counter: &PulseCounter) -> u32 {
        if let Some(entry) = self.entries.pop_front() {
            return entry.value() & !PROVISIONAL_FLAG;
        }

        let (partial, anchor) =
            critical_section::with(|_| (self.cursor.peek(counter), self.last_closed_utc));
        if anchor == 0 {
            PROVISIONAL_FLAG
        } else {
            (partial & !PROVISIONAL_FLAG) | PROVISIONAL_FLAG
        }
    }

    /// Finalized entries waiting to be read.
    pub fn events_available(&self) -> u16 {
        self.entries.len() as u16
    }

    /// UTC at which the last period closed (or the log started).
    pub fn last_closed_period_timestamp(&self) -> u64 {
        self.last_closed_utc
    }

    /// Entries discarded because the queue was full.
    pub fn evicted_total(&self) -> u32 {
        self.evicted_total
    }

    /// Finalized entries oldest first, without consuming them.
    pub fn iter(&self) -> impl Iterator<Item = &EventLogEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::virtual_board::VirtualSenseLine;

    fn pulses(counter: &PulseCounter, n: u32) {
        let mut sense = VirtualSenseLine::default();
        for _ in 0..n {
            counter.on_edge(&mut sense);
        }
    }

    #[test]
    fn test_entry_packing() {
        assert_eq!(EventLogEntry::from_delta(0x12_3456).to_bytes(), [0x12, 0x34, 0x56]);
        assert_eq!(EventLogEntry::from_delta(0x12_3456).value(), 0x12_3456);
        assert_eq!(
            EventLogEntry::from_delta(0x0100_0000).value(),
            EVENT_ENTRY_MAX,
            "oversized deltas saturate"
        );
    }

    #[test]
    fn test_never_started_reads_bare_flag() {
        let counter = PulseCounter::new();
        let mut log = EventQueue::new(&counter);
        pulses(&counter, 12);
        assert_eq!(log.get_next_event(&counter), 0x8000_0000);
    }

    #[test]
    fn test_provisional_event_carries_partial_delta() {
        let counter = PulseCounter::new();
        let mut log = EventQueue::new(&counter);
        log.start(&counter, 1_700_000_000);
        pulses(&counter, 12);

        assert_eq!(log.get_next_event(&counter), 12 | 0x8000_0000);
        // Peeking does not finalize.
        assert_eq!(log.events_available(), 0);
        assert_eq!(log.get_next_event(&counter), 12 | 0x8000_0000);
    }

    #[test]
    fn test_close_period_appends_delta() {
        let counter = PulseCounter::new();
        let mut log = EventQueue::new(&counter);
        log.start(&counter, 1_000);

        pulses(&counter, 30);
        log.close_period(&counter, 4_600);
        pulses(&counter, 5);

        assert_eq!(log.events_available(), 1);
        assert_eq!(log.last_closed_period_timestamp(), 4_600);
        assert_eq!(log.get_next_event(&counter), 30);
        assert_eq!(log.events_available(), 0);
        assert_eq!(log.get_next_event(&counter), 5 | 0x8000_0000);
    }

    #[test]
    fn test_fifo_with_eviction() {
        let counter = PulseCounter::new();
        let mut log = EventQueue::new(&counter);
        log.start(&counter, 1);

        for i in 0..=EVENT_LOG_CAPACITY as u32 {
            pulses(&counter, i % 50);
            log.close_period(&counter, 1 + (i as u64 + 1) * 3600);
        }

        assert_eq!(log.events_available() as usize, EVENT_LOG_CAPACITY);
        assert_eq!(log.evicted_total(), 1);
        for i in 1..=EVENT_LOG_CAPACITY as u32 {
            assert_eq!(log.get_next_event(&counter), i % 50, "entry {}", i);
        }
        assert_eq!(log.events_available(), 0);
    }
}
