//! HV cycle timing recipe
//!
//! Nanosecond durations from [`HvPumpConfig`] are converted once, at init,
//! into compare values for the cycle control timer. A cycle is laid out as
//!
//! ```text
//!  tick: 1          pulse_end        window_end       discharge_end
//!        |--- on ---|--- fly-back ---|--- discharge ---|
//! ```
//!
//! The recipe is rejected if any on-time converts to zero ticks, any two
//! boundaries coincide, the last boundary does not fit the timer, or the
//! charging pace is slower than the steady pace.

use thiserror_no_std::Error;

use crate::config::{HvPumpConfig, HV_PULSE_START_TICK};

/// HV timing derivation failures. All of them are fatal at init.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TimingError {
    /// A duration converted to zero ticks
    #[error("{field} is not positive")]
    NonPositive {
        /// Offending parameter
        field: &'static str,
    },

    /// Two consecutive phase boundaries landed on the same tick
    #[error("{first} and {second} coincide at tick {tick}")]
    CoincidentBoundaries {
        /// Earlier boundary
        first: &'static str,
        /// Later boundary
        second: &'static str,
        /// Shared tick
        tick: u64,
    },

    /// The cycle does not fit the timer's counting range
    #[error("Cycle needs {ticks} ticks, timer holds {max_ticks}")]
    RangeExceeded {
        /// Last boundary of the cycle
        ticks: u64,
        /// Largest compare value
        max_ticks: u32,
    },

    /// Charging pace slower than steady pace
    #[error("Charging interval {charging_ms} ms exceeds steady interval {steady_ms} ms")]
    PacingInversion {
        charging_ms: u32,
        steady_ms: u32,
    },

    /// Attempt cap of zero would never pulse
    #[error("Attempt cap is zero")]
    ZeroAttempts,
}

pub type TimingResult<T> = Result<T, TimingError>;

/// Compare values of one pulse cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSchedule {
    pub pulse_start: u32,
    pub pulse_end: u32,
    pub window_end: u32,
    /// `None` when the discharge phase is disabled.
    pub discharge_end: Option<u32>,
}

impl CycleSchedule {
    /// Pump on-time in ticks.
    pub fn on_ticks(&self) -> u32 {
        self.pulse_end - self.pulse_start
    }

    /// Tick at which the timer stops.
    pub fn last_tick(&self) -> u32 {
        self.discharge_end.unwrap_or(self.window_end)
    }
}

/// Complete, validated timing recipe of the HV pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HvTimingParams {
    /// First pulse of a charging sequence.
    pub try_cycle: CycleSchedule,
    /// Every following pulse of the same sequence.
    pub work_cycle: CycleSchedule,
    pub charging_interval_ms: u32,
    pub steady_interval_ms: u32,
    pub max_attempts: u8,
}

/// `ns * freq / 1e9`, truncating. Cannot overflow in 64 bits for 32-bit inputs.
pub fn ns_to_ticks(ns: u32, timer_hz: u32) -> u64 {
    ns as u64 * timer_hz as u64 / 1_000_000_000
}

impl HvTimingParams {
    /// Derive and validate the recipe for a timer running at `timer_hz`
    /// whose compare channels hold at most `max_ticks`.
    pub fn derive(config: &HvPumpConfig, timer_hz: u32, max_ticks: u32) -> TimingResult<Self> {
        if timer_hz == 0 {
            return Err(TimingError::NonPositive {
                field: "timer frequency",
            });
        }
        if config.max_attempts == 0 {
            return Err(TimingError::ZeroAttempts);
        }
        if config.charging_interval_ms == 0 {
            return Err(TimingError::NonPositive {
                field: "charging interval",
            });
        }
        if config.charging_interval_ms > config.steady_interval_ms {
            return Err(TimingError::PacingInversion {
                charging_ms: config.charging_interval_ms,
                steady_ms: config.steady_interval_ms,
            });
        }

        let flyback = ns_to_ticks(config.flyback_window_ns, timer_hz);
        let discharge = if config.discharge_window_ns == 0 {
            None
        } else {
            Some(ns_to_ticks(config.discharge_window_ns, timer_hz))
        };

        let try_cycle = build_cycle(
            "try on-time",
            ns_to_ticks(config.try_on_time_ns, timer_hz),
            flyback,
            discharge,
            max_ticks,
        )?;
        let work_cycle = build_cycle(
            "work on-time",
            ns_to_ticks(config.work_on_time_ns, timer_hz),
            flyback,
            discharge,
            max_ticks,
        )?;

        Ok(Self {
            try_cycle,
            work_cycle,
            charging_interval_ms: config.charging_interval_ms,
            steady_interval_ms: config.steady_interval_ms,
            max_attempts: config.max_attempts,
        })
    }

    /// Schedule for the pulse that follows `attempts` failed ones.
    pub fn cycle_for_attempt(&self, attempts: u8) -> &CycleSchedule {
        if attempts == 0 {
            &self.try_cycle
        } else {
            &self.work_cycle
        }
    }
}

fn build_cycle(
    on_field: &'static str,
    on_ticks: u64,
    flyback_ticks: u64,
    discharge_ticks: Option<u64>,
    max_ticks: u32,
) -> TimingResult<CycleSchedule> {
    if on_ticks == 0 {
        return Err(TimingError::NonPositive { field: on_field });
    }

    let pulse_start = HV_PULSE_START_TICK as u64;
    let pulse_end = pulse_start + on_ticks;
    let window_end = pulse_end + flyback_ticks;
    if window_end == pulse_end {
        return Err(TimingError::CoincidentBoundaries {
            first: "pulse end",
            second: "fly-back window end",
            tick: window_end,
        });
    }

    let discharge_end = match discharge_ticks {
        Some(ticks) => {
            let end = window_end + ticks;
            if end == window_end {
                return Err(TimingError::CoincidentBoundaries {
                    first: "fly-back window end",
                    second: "discharge end",
                    tick: end,
                });
            }
            Some(end)
        }
        None => None,
    };

    let last = discharge_end.unwrap_or(window_end);
    if last > max_ticks as u64 {
        return Err(TimingError::RangeExceeded {
            ticks: last,
            max_ticks,
        });
    }

    // Every boundary is <= max_ticks, so the narrowing casts are exact.
    Ok(CycleSchedule {
        pulse_start: pulse_start as u32,
        pulse_end: pulse_end as u32,
        window_end: window_end as u32,
        discharge_end: discharge_end.map(|t| t as u32),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HV_TIMER_FREQ_HZ, HV_TIMER_MAX_TICKS};

    fn derive(config: &HvPumpConfig) -> TimingResult<HvTimingParams> {
        HvTimingParams::derive(config, HV_TIMER_FREQ_HZ, HV_TIMER_MAX_TICKS)
    }

    #[test]
    fn test_default_recipe_ticks() {
        let params = derive(&HvPumpConfig::default()).unwrap();

        // 250 us, 500 us, 1 ms and 200 us at 16 MHz.
        assert_eq!(params.try_cycle.on_ticks(), 4_000);
        assert_eq!(params.work_cycle.on_ticks(), 8_000);
        assert_eq!(params.try_cycle.pulse_start, 1);
        assert_eq!(params.try_cycle.window_end, 1 + 4_000 + 16_000);
        assert_eq!(params.work_cycle.discharge_end, Some(1 + 8_000 + 16_000 + 3_200));
    }

    #[test]
    fn test_ns_to_ticks_truncates() {
        assert_eq!(ns_to_ticks(62, 16_000_000), 0);
        assert_eq!(ns_to_ticks(63, 16_000_000), 1);
        assert_eq!(ns_to_ticks(u32::MAX, u32::MAX), 18_446_744_065);
    }

    #[test]
    fn test_zero_on_time_rejected() {
        let config = HvPumpConfig {
            try_on_time_ns: 50,
            ..HvPumpConfig::default()
        };
        assert_eq!(
            derive(&config),
            Err(TimingError::NonPositive {
                field: "try on-time"
            })
        );
    }

    #[test]
    fn test_coincident_window_rejected() {
        let config = HvPumpConfig {
            flyback_window_ns: 10,
            ..HvPumpConfig::default()
        };
        assert!(matches!(
            derive(&config),
            Err(TimingError::CoincidentBoundaries { .. })
        ));
    }

    #[test]
    fn test_discharge_disabled_by_zero() {
        let config = HvPumpConfig {
            discharge_window_ns: 0,
            ..HvPumpConfig::default()
        };
        let params = derive(&config).unwrap();
        assert_eq!(params.work_cycle.discharge_end, None);
        assert_eq!(params.work_cycle.last_tick(), params.work_cycle.window_end);
    }

    #[test]
    fn test_cycle_exceeding_timer_rejected() {
        // 4 ms on-time needs 64_000 ticks plus the windows.
        let config = HvPumpConfig {
            work_on_time_ns: 4_000_000,
            ..HvPumpConfig::default()
        };
        assert!(matches!(
            derive(&config),
            Err(TimingError::RangeExceeded { max_ticks: 65_535, .. })
        ));
    }

    #[test]
    fn test_pacing_inversion_rejected() {
        let config = HvPumpConfig {
            charging_interval_ms: 2_000,
            ..HvPumpConfig::default()
        };
        assert!(matches!(
            derive(&config),
            Err(TimingError::PacingInversion { .. })
        ));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = HvPumpConfig {
            max_attempts: 0,
            ..HvPumpConfig::default()
        };
        assert_eq!(derive(&config), Err(TimingError::ZeroAttempts));
    }

    #[test]
    fn test_cycle_for_attempt() {
        let params = derive(&HvPumpConfig::default()).unwrap();
        assert_eq!(params.cycle_for_attempt(0), &params.try_cycle);
        assert_eq!(params.cycle_for_attempt(1), &params.work_cycle);
        assert_eq!(params.cycle_for_attempt(63), &params.work_cycle);
    }
}
