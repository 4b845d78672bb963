//! Wall-clock time
//!
//! The device keeps a monotonic uptime from boot. UTC is only known once a
//! host has set it; until then every UTC read is zero, which downstream
//! consumers (the event log) treat as "no anchor".

use log::{info, warn};

/// UTC clock derived from uptime plus an offset set by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UtcClock {
    /// `utc_ms - uptime_ms`, once set.
    offset_ms: Option<i64>,
}

impl UtcClock {
    pub const fn new() -> Self {
        Self { offset_ms: None }
    }

    /// Set the current UTC time in seconds. Zero is rejected, as is a value
    /// whose millisecond offset does not fit an `i64`.
    ///
    /// Returns whether UTC is enabled after the call, so a rejected update
    /// on an already-set clock still returns `true`.
    pub fn set_utc(&mut self, utc_s: u64, uptime_ms: u64) -> bool {
        if utc_s == 0 {
            return self.is_set();
        }
        match offset_ms(utc_s, uptime_ms) {
            Some(offset) => {
                self.offset_ms = Some(offset);
                info!("TIME: UTC set to {}", utc_s);
            }
            None => warn!("TIME: UTC {} out of range, ignored", utc_s),
        }
        self.is_set()
    }

    pub fn is_set(&self) -> bool {
        self.offset_ms.is_some()
    }

    /// Current UTC in seconds, or 0 if never set.
    pub fn utc(&self, uptime_ms: u64) -> u64 {
        match self.offset_ms {
            Some(offset) => ((uptime_ms as i64 + offset).max(0) / 1000) as u64,
            None => 0,
        }
    }
}

fn offset_ms(utc_s: u64, uptime_ms: u64) -> Option<i64> {
    let utc_ms = i64::try_from(utc_s.checked_mul(1000)?).ok()?;
    utc_ms.checked_sub(i64::try_from(uptime_ms).ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_clock_reads_zero() {
        let clock = UtcClock::new();
        assert!(!clock.is_set());
        assert_eq!(clock.utc(123_456), 0);
    }

    #[test]
    fn test_zero_is_rejected() {
        let mut clock = UtcClock::new();
        assert!(!clock.set_utc(0, 10));
        assert_eq!(clock.utc(10), 0);
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let mut clock = UtcClock::new();
        assert!(!clock.set_utc(u64::MAX, 0));
        assert!(!clock.set_utc(i64::MAX as u64 / 1000 + 1, 0));
        assert_eq!(clock.utc(0), 0);

        assert!(clock.set_utc(1_700_000_000, 0));
        assert!(clock.set_utc(u64::MAX, 1_000));
        assert_eq!(clock.utc(1_000), 1_700_000_001, "old anchor kept");
    }

    #[test]
    fn test_utc_follows_uptime() {
        let mut clock = UtcClock::new();
        assert!(clock.set_utc(1_700_000_000, 5_000));
        assert_eq!(clock.utc(5_000), 1_700_000_000);
        assert_eq!(clock.utc(65_999), 1_700_000_060);

        // Rejected update keeps the old anchor.
        assert!(clock.set_utc(0, 70_000));
        assert_eq!(clock.utc(70_000), 1_700_000_065);
    }
}
