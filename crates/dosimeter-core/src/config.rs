//! Device configuration
//!
//! Compile-time constants size every static buffer and provide the factory
//! defaults. The runtime-tunable subset is grouped in [`DosimeterConfig`],
//! which round-trips through `postcard` so a calibration blob kept in flash
//! (or handed to the simulator) can override the defaults.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

// ---------------------------------------------------------------------------
// HV pump
// ---------------------------------------------------------------------------

/// Tick frequency of the cycle control timer (16 MHz).
pub const HV_TIMER_FREQ_HZ: u32 = 16_000_000;

/// Largest compare value the 16-bit cycle timer can reach.
pub const HV_TIMER_MAX_TICKS: u32 = u16::MAX as u32;

/// Tick at which the charge pulse starts. Compare value zero never matches
/// after a clear, so the sequence begins one tick in.
pub const HV_PULSE_START_TICK: u32 = 1;

/// On-time of the first ("try") pulse of a charging sequence.
pub const HV_TRY_ON_TIME_NS: u32 = 250_000;

/// On-time of every following ("work") pulse of the same sequence.
pub const HV_WORK_ON_TIME_NS: u32 = 500_000;

/// Fly-back observation window after the pulse ends.
pub const HV_FLYBACK_WINDOW_NS: u32 = 1_000_000;

/// Recuperation window after observation. Zero disables the phase.
pub const HV_DISCHARGE_WINDOW_NS: u32 = 200_000;

/// Pacing interval while the bias is still below the feedback threshold.
pub const HV_CHARGING_INTERVAL_MS: u32 = 20;

/// Pacing interval once feedback has been observed.
pub const HV_STEADY_INTERVAL_MS: u32 = 1000;

/// Failed pulses tolerated per charging sequence.
pub const HV_MAX_ATTEMPTS: u8 = 64;

/// Settling delay of the feedback comparator before its output is valid.
pub const HV_COMPARATOR_SETTLE_US: u32 = 30;

// ---------------------------------------------------------------------------
// Dose-rate aggregator
// ---------------------------------------------------------------------------

/// Base tick period of the aggregator.
pub const AGGREGATOR_PERIOD_S: u32 = 10;

/// Number of cascade levels.
pub const TIMEFRAMES_TOTAL: usize = 5;

/// Nominal duration of each cascade level: 40 s, 4 min, 20 min, 2 h, 8 h.
pub const TIMEFRAME_SPANS_S: [u32; TIMEFRAMES_TOTAL] = [40, 240, 1200, 7200, 8 * 3600];

/// Slots per cascade level, derived from consecutive spans.
pub const TIMEFRAME_SIZES: [usize; TIMEFRAMES_TOTAL] = [
    (TIMEFRAME_SPANS_S[0] / AGGREGATOR_PERIOD_S) as usize,
    (TIMEFRAME_SPANS_S[1] / TIMEFRAME_SPANS_S[0]) as usize,
    (TIMEFRAME_SPANS_S[2] / TIMEFRAME_SPANS_S[1]) as usize,
    (TIMEFRAME_SPANS_S[3] / TIMEFRAME_SPANS_S[2]) as usize,
    (TIMEFRAME_SPANS_S[4] / TIMEFRAME_SPANS_S[3]) as usize,
];

/// Capacity of the largest cascade ring.
pub const TIMEFRAME_MAX_SLOTS: usize = 8;

/// Counts per base tick above which the alarm sound is triggered
/// (~60 µR/h, about 3.3× background).
pub const AGGREGATOR_ALARM_COUNTS: u16 = 15;

/// Counts per base tick above which the danger sound is triggered
/// (~168 µR/h, about 10× background).
pub const AGGREGATOR_DANGER_COUNTS: u16 = 42;

// ---------------------------------------------------------------------------
// Real-time watcher
// ---------------------------------------------------------------------------

/// Length of the sliding dose window in one-second slots.
pub const WATCHER_WINDOW_S: usize = 40;

/// 40-second sum above which the warning sound fires.
pub const WATCHER_WARNING_SUM: u16 = 85;

/// 40-second sum above which the danger sound fires.
pub const WATCHER_DANGER_SUM: u16 = 170;

/// Seconds before an active alarm may sound again.
pub const ALARM_REPEAT_PERIOD_S: u16 = 1800;

/// Counts within one second that drain the bias faster than the steady
/// pacing can replace it.
pub const CRITICAL_DISCHARGE_CPS: u8 = 100;

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// Length of one event-log period.
pub const EVENT_LOG_PERIOD_S: u32 = 3600;

/// Number of finalized hourly entries retained (~45 days).
pub const EVENT_LOG_CAPACITY: usize = 1100;

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

/// Default cadence at which the firmware reports the total pulse count.
pub const COUNT_REPORT_INTERVAL_MS: u32 = 1000;

/// Accepted range for the count report cadence.
pub const COUNT_REPORT_INTERVAL_RANGE_MS: core::ops::RangeInclusive<u32> = 100..=120_000;

// ---------------------------------------------------------------------------
// Runtime configuration
// ---------------------------------------------------------------------------

/// Error types for configuration handling
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The stored blob could not be decoded
    #[error("Configuration blob is malformed")]
    Malformed,

    /// The configuration could not be encoded
    #[error("Configuration could not be encoded")]
    Encode,

    /// Cascade level outside `0..TIMEFRAMES_TOTAL`
    #[error("Invalid timeframe level: {level}")]
    InvalidLevel {
        /// The rejected level
        level: u8,
    },

    /// A period or interval that must be nonzero was zero
    #[error("Zero period: {field}")]
    ZeroPeriod {
        /// Offending field
        field: &'static str,
    },

    /// A lower alarm threshold is not below the higher one
    #[error("Threshold inversion: {field}")]
    ThresholdInversion {
        /// Offending threshold pair
        field: &'static str,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// HV pump timing recipe, before conversion to timer ticks.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct HvPumpConfig {
    pub try_on_time_ns: u32,
    pub work_on_time_ns: u32,
    pub flyback_window_ns: u32,
    /// Zero disables the discharge phase.
    pub discharge_window_ns: u32,
    pub charging_interval_ms: u32,
    pub steady_interval_ms: u32,
    pub max_attempts: u8,
}

impl Default for HvPumpConfig {
    fn default() -> Self {
        Self {
            try_on_time_ns: HV_TRY_ON_TIME_NS,
            work_on_time_ns: HV_WORK_ON_TIME_NS,
            flyback_window_ns: HV_FLYBACK_WINDOW_NS,
            discharge_window_ns: HV_DISCHARGE_WINDOW_NS,
            charging_interval_ms: HV_CHARGING_INTERVAL_MS,
            steady_interval_ms: HV_STEADY_INTERVAL_MS,
            max_attempts: HV_MAX_ATTEMPTS,
        }
    }
}

/// Immediate alarm thresholds applied to each aggregator tick.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    pub alarm_counts: u16,
    pub danger_counts: u16,
    /// Level reported by `get_active_level_volume` after boot.
    pub initial_level: u8,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            alarm_counts: AGGREGATOR_ALARM_COUNTS,
            danger_counts: AGGREGATOR_DANGER_COUNTS,
            initial_level: 0,
        }
    }
}

/// Real-time watcher thresholds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    pub warning_sum: u16,
    pub danger_sum: u16,
    pub repeat_period_s: u16,
    pub critical_discharge_cps: u8,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            warning_sum: WATCHER_WARNING_SUM,
            danger_sum: WATCHER_DANGER_SUM,
            repeat_period_s: ALARM_REPEAT_PERIOD_S,
            critical_discharge_cps: CRITICAL_DISCHARGE_CPS,
        }
    }
}

/// Event log cadence.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLogConfig {
    pub period_s: u32,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            period_s: EVENT_LOG_PERIOD_S,
        }
    }
}

/// Complete runtime configuration of the core.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DosimeterConfig {
    pub hv: HvPumpConfig,
    pub aggregator: AggregatorConfig,
    pub watcher: WatcherConfig,
    pub event_log: EventLogConfig,
}

impl DosimeterConfig {
    /// Decode a configuration blob and validate it.
    pub fn from_bytes(bytes: &[u8]) -> ConfigResult<Self> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Malformed)?;
        config.validate()?;
        Ok(config)
    }

    /// Encode the configuration for storage.
    pub fn to_bytes(&self) -> ConfigResult<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|_| ConfigError::Encode)
    }

    /// Check cross-field invariants.
    ///
    /// HV timing is validated separately when the tick recipe is derived,
    /// since that check depends on the timer the firmware acquired.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.aggregator.alarm_counts >= self.aggregator.danger_counts {
            return Err(ConfigError::ThresholdInversion {
                field: "aggregator.alarm_counts >= aggregator.danger_counts",
            });
        }
        if self.aggregator.initial_level as usize >= TIMEFRAMES_TOTAL {
            return Err(ConfigError::InvalidLevel {
                level: self.aggregator.initial_level,
            });
        }
        if self.watcher.warning_sum >= self.watcher.danger_sum {
            return Err(ConfigError::ThresholdInversion {
                field: "watcher.warning_sum >= watcher.danger_sum",
            });
        }
        if self.watcher.repeat_period_s == 0 {
            return Err(ConfigError::ZeroPeriod {
                field: "watcher.repeat_period_s",
            });
        }
        if self.event_log.period_s == 0 {
            return Err(ConfigError::ZeroPeriod {
                field: "event_log.period_s",
            });
        }
        if self.hv.steady_interval_ms == 0 || self.hv.charging_interval_ms == 0 {
            return Err(ConfigError::ZeroPeriod {
                field: "hv pacing interval",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_sizes() {
        assert_eq!(TIMEFRAME_SIZES, [4, 6, 5, 6, 4]);
        assert!(TIMEFRAME_SIZES.iter().all(|&s| s <= TIMEFRAME_MAX_SLOTS));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(DosimeterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_blob_roundtrip() {
        let mut config = DosimeterConfig::default();
        config.watcher.danger_sum = 300;
        config.hv.max_attempts = 12;

        let bytes = config.to_bytes().unwrap();
        let decoded = DosimeterConfig::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, config);
    }

    #[test]
    fn test_truncated_blob_is_rejected() {
        let bytes = DosimeterConfig::default().to_bytes().unwrap();
        let result = DosimeterConfig::from_bytes(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(ConfigError::Malformed)));
    }

    #[test]
    fn test_inverted_watcher_thresholds_rejected() {
        let mut config = DosimeterConfig::default();
        config.watcher.warning_sum = config.watcher.danger_sum;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdInversion { .. })
        ));
    }

    #[test]
    fn test_invalid_initial_level_rejected() {
        let mut config = DosimeterConfig::default();
        config.aggregator.initial_level = TIMEFRAMES_TOTAL as u8;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLevel { level: 5 })
        ));
    }
}
