//! Audible alarm levels and the sound output seam
//!
//! Waveform generation lives outside the core; components only decide
//! *which* sound to trigger and hand it to an [`AlarmSink`].

/// Radiation alarm level
///
/// Ordered: `None < Warning < Danger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum AlarmLevel {
    /// Background radiation
    #[default]
    None,
    /// Elevated dose rate
    Warning,
    /// Dose rate well above background
    Danger,
}

impl AlarmLevel {
    /// Classify `value` against a pair of thresholds. Comparisons are strict
    /// and danger is checked first.
    pub fn assess(value: u32, warning: u32, danger: u32) -> Self {
        if value > danger {
            Self::Danger
        } else if value > warning {
            Self::Warning
        } else {
            Self::None
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Warning => "warning",
            Self::Danger => "danger",
        }
    }
}

/// Sound output.
pub trait AlarmSink {
    fn sound_alarm(&mut self);
    fn sound_danger(&mut self);

    /// Trigger the sound for `level`. `None` is silent.
    fn sound(&mut self, level: AlarmLevel) {
        match level {
            AlarmLevel::None => {}
            AlarmLevel::Warning => self.sound_alarm(),
            AlarmLevel::Danger => self.sound_danger(),
        }
    }
}

/// Sink that only counts triggers. Used by the simulator and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CountingAlarmSink {
    pub alarms: u32,
    pub dangers: u32,
}

impl AlarmSink for CountingAlarmSink {
    fn sound_alarm(&mut self) {
        self.alarms += 1;
    }

    fn sound_danger(&mut self) {
        self.dangers += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assess_is_strict() {
        assert_eq!(AlarmLevel::assess(15, 15, 42), AlarmLevel::None);
        assert_eq!(AlarmLevel::assess(16, 15, 42), AlarmLevel::Warning);
        assert_eq!(AlarmLevel::assess(42, 15, 42), AlarmLevel::Warning);
        assert_eq!(AlarmLevel::assess(43, 15, 42), AlarmLevel::Danger);
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(AlarmLevel::None < AlarmLevel::Warning);
        assert!(AlarmLevel::Warning < AlarmLevel::Danger);
    }

    #[test]
    fn test_sound_dispatch() {
        let mut sink = CountingAlarmSink::default();
        sink.sound(AlarmLevel::None);
        sink.sound(AlarmLevel::Warning);
        sink.sound(AlarmLevel::Danger);
        sink.sound(AlarmLevel::Danger);
        assert_eq!(sink, CountingAlarmSink { alarms: 1, dangers: 2 });
    }
}
