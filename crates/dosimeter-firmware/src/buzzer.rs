//! Alarm sounds on a piezo buzzer
//!
//! The core raises sounds from the main loop; the buzzer task plays them.
//! Requests travel through a [`Signal`], so a danger request that arrives
//! while a warning is still queued replaces it.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use embedded_hal::digital::OutputPin;

use dosimeter_core::alarm::{AlarmLevel, AlarmSink};

pub type SoundSignal = Signal<CriticalSectionRawMutex, AlarmLevel>;

/// Beep count and half-period for a level.
pub const fn pattern(level: AlarmLevel) -> (u8, Duration) {
    match level {
        AlarmLevel::None => (0, Duration::from_millis(0)),
        AlarmLevel::Warning => (3, Duration::from_millis(120)),
        AlarmLevel::Danger => (12, Duration::from_millis(50)),
    }
}

/// Play `level` on `pin`.
pub async fn play<P: OutputPin>(pin: &mut P, level: AlarmLevel) {
    let (beeps, half_period) = pattern(level);
    for _ in 0..beeps {
        let _ = pin.set_high();
        Timer::after(half_period).await;
        let _ = pin.set_low();
        Timer::after(half_period).await;
    }
}

/// [`AlarmSink`] that queues the sound for the buzzer task.
pub struct BuzzerSink {
    signal: &'static SoundSignal,
}

impl BuzzerSink {
    pub const fn new(signal: &'static SoundSignal) -> Self {
        Self { signal }
    }

    fn request(&mut self, level: AlarmLevel) {
        let queued = self.signal.try_take().unwrap_or_default();
        self.signal.signal(level.max(queued));
    }
}

impl AlarmSink for BuzzerSink {
    fn sound_alarm(&mut self) {
        self.request(AlarmLevel::Warning);
    }

    fn sound_danger(&mut self) {
        self.request(AlarmLevel::Danger);
    }
}
