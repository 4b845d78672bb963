//! Real-time alarm and HV feedback watcher
//!
//! Runs once per second. Keeps a 40-second sliding window of per-second
//! pulse counts, sounds the warning/danger alarms with repeat suppression,
//! and asks the HV pump for an immediate cycle when a single second's count
//! is high enough to drain the tube bias faster than steady pacing refills
//! it.
//!
//! ## Alarm hysteresis
//!
//! - a level fires when the sum is above its threshold and either the
//!   current level is lower or the repeat countdown has run out
//! - firing restarts the countdown
//! - once the countdown is zero and the sum is back under the warning
//!   threshold, the level returns to `None`

use log::{debug, info};

use crate::alarm::{AlarmLevel, AlarmSink};
use crate::config::{WatcherConfig, WATCHER_WINDOW_S};
use crate::hv_pump::ImmediateCycle;
use crate::pulse_counter::{CounterCursor, PulseCounter};

/// Last [`WATCHER_WINDOW_S`] one-second deltas, each clamped to a byte.
#[derive(Debug, Clone)]
pub struct InstantWindow {
    slots: [u8; WATCHER_WINDOW_S],
    next: usize,
    sum: u16,
}

impl InstantWindow {
    pub const fn new() -> Self {
        Self {
            slots: [0; WATCHER_WINDOW_S],
            next: 0,
            sum: 0,
        }
    }

    /// Store one second's delta, overwriting the oldest slot. Returns the
    /// clamped value.
    pub fn push(&mut self, delta: u32) -> u8 {
        let clamped = delta.min(u8::MAX as u32) as u8;
        let old = self.slots[self.next];
        self.slots[self.next] = clamped;
        self.next = (self.next + 1) % WATCHER_WINDOW_S;
        self.sum = self.sum - old as u16 + clamped as u16;
        clamped
    }

    /// Sum over the window.
    pub fn sum(&self) -> u16 {
        self.sum
    }
}

impl Default for InstantWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Alarm level plus its repeat-suppression countdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlarmState {
    pub level: AlarmLevel,
    pub countdown_s: u16,
}

pub struct RealtimeWatcher {
    window: InstantWindow,
    alarm: AlarmState,
    cursor: CounterCursor,
    config: WatcherConfig,
    kicks: u32,
}

impl RealtimeWatcher {
    pub fn new(config: &WatcherConfig, counter: &PulseCounter) -> Self {
        Self {
            window: InstantWindow::new(),
            alarm: AlarmState::default(),
            cursor: CounterCursor::new(counter),
            config: *config,
            kicks: 0,
        }
    }

    /// One-second tick. Returns this second's clamped delta.
    pub fn tick<A, K>(&mut self, counter: &PulseCounter, alarms: &mut A, hv: &mut K) -> u8
    where
        A: AlarmSink,
        K: ImmediateCycle,
    {
        let delta = self.window.push(self.cursor.advance(counter));

        if delta > self.config.critical_discharge_cps {
            debug!("RPW: {} cps, kicking HV pump", delta);
            self.kicks = self.kicks.wrapping_add(1);
            hv.request_immediate_cycle();
        }

        self.update_alarm(alarms);
        delta
    }

    fn update_alarm<A: AlarmSink>(&mut self, alarms: &mut A) {
        if self.alarm.countdown_s > 0 {
            self.alarm.countdown_s -= 1;
        }

        let sum = self.window.sum();
        let expired = self.alarm.countdown_s == 0;

        let fire = if sum > self.config.danger_sum
            && (self.alarm.level < AlarmLevel::Danger || expired)
        {
            Some(AlarmLevel::Danger)
        } else if sum > self.config.warning_sum
            && (self.alarm.level < AlarmLevel::Warning || expired)
        {
            Some(AlarmLevel::Warning)
        } else {
            None
        };

        match fire {
            Some(level) => {
                info!("RPW: 40 s sum {}, sounding {}", sum, level.label());
                alarms.sound(level);
                self.alarm = AlarmState {
                    level,
                    countdown_s: self.config.repeat_period_s,
                };
            }
            None if expired && sum <= self.config.warning_sum => {
                self.alarm.level = AlarmLevel::None;
            }
            None => {}
        }
    }

    /// Pulse count over the last 40 seconds.
    pub fn get_instant_sum(&self) -> u16 {
        self.window.sum()
    }

    pub fn alarm_state(&self) -> AlarmState {
        self.alarm
    }

    /// Immediate HV cycles requested since start.
    pub fn kicks(&self) -> u32 {
        self.kicks
    }
}
