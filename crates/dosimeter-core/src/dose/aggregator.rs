use log::{debug, info};

use super::TimeframeAccumulator;
use crate::alarm::{AlarmLevel, AlarmSink};
use crate::config::{AggregatorConfig, ConfigError, ConfigResult, TIMEFRAMES_TOTAL, TIMEFRAME_SIZES};
use crate::pulse_counter::{CounterCursor, PulseCounter};

/// Cascading dose-rate aggregator.
///
/// ## Base tick
///
/// Every `AGGREGATOR_PERIOD_S` the firmware calls [`tick`](Self::tick):
/// 1. the pulse delta since the previous tick is taken
/// 2. it is compared against the immediate alarm thresholds
/// 3. it is pushed into level 0, carrying up the cascade as levels complete
pub struct DoseAggregator {
    frames: [TimeframeAccumulator; TIMEFRAMES_TOTAL],
    cursor: CounterCursor,
    active_level: u8,
    last_delta: u32,
    alarm_counts: u32,
    danger_counts: u32,
    ticks: u32,
}

impl DoseAggregator {
    pub fn new(config: &AggregatorConfig, counter: &PulseCounter) -> ConfigResult<Self> {
        let mut aggregator = Self {
            frames: TIMEFRAME_SIZES.map(TimeframeAccumulator::new),
            cursor: CounterCursor::new(counter),
            active_level: 0,
            last_delta: 0,
            alarm_counts: config.alarm_counts as u32,
            danger_counts: config.danger_counts as u32,
            ticks: 0,
        };
        aggregator.set_active_level(config.initial_level)?;
        Ok(aggregator)
    }

    /// Run one base tick. Returns the immediate alarm level of this tick.
    pub fn tick<A: AlarmSink>(&mut self, counter: &PulseCounter, alarms: &mut A) -> AlarmLevel {
        let delta = self.cursor.advance(counter);
        self.last_delta = delta;

        let level = AlarmLevel::assess(delta, self.alarm_counts, self.danger_counts);
        if level != AlarmLevel::None {
            info!("DOSE: {} counts in base period, sounding {}", delta, level.label());
        }
        alarms.sound(level);

        self.push_delta(delta);
        level
    }

    /// Feed one base-period delta into the cascade.
    pub fn push_delta(&mut self, delta: u32) {
        self.ticks = self.ticks.wrapping_add(1);
        let mut carry = Some(delta);
        for (level, frame) in self.frames.iter_mut().enumerate() {
            let Some(value) = carry else {
                break;
            };
            carry = frame.push(value);
            if carry.is_some() {
                debug!("DOSE: level {} closed, volume {}", level, frame.volume());
            }
        }
    }

    /// Volume of the level selected with [`set_active_level`](Self::set_active_level).
    pub fn get_active_level_volume(&self) -> u32 {
        self.frames[self.active_level as usize].volume()
    }

    /// Select which level [`get_active_level_volume`](Self::get_active_level_volume)
    /// reports.
    pub fn set_active_level(&mut self, level: u8) -> ConfigResult<()> {
        if level as usize >= TIMEFRAMES_TOTAL {
            return Err(ConfigError::InvalidLevel { level });
        }
        self.active_level = level;
        Ok(())
    }

    pub fn active_level(&self) -> u8 {
        self.active_level
    }

    /// Volume of any level, or `None` past the last one.
    pub fn level_volume(&self, level: usize) -> Option<u32> {
        self.frames.get(level).map(TimeframeAccumulator::volume)
    }

    pub fn level(&self, level: usize) -> Option<&TimeframeAccumulator> {
        self.frames.get(level)
    }

    /// Delta of the most recent base tick.
    pub fn last_delta(&self) -> u32 {
        self.last_delta
    }

    /// Base ticks since start.
    pub fn ticks(&self) -> u32 {
        self.ticks
    }
}
