//! Out-of-band HV cycle requests from the watcher

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use dosimeter_core::hv_pump::{ImmediateCycle, SharedHvPump};

use crate::hv_board::McpwmHvBoard;

/// Wakes the HV task: a cycle was primed outside its pacing schedule.
pub type HvWake = Signal<CriticalSectionRawMutex, ()>;

/// Primes a cycle on the shared pump and wakes the HV task to run it.
pub struct HvKick {
    pump: &'static SharedHvPump<McpwmHvBoard>,
    wake: &'static HvWake,
}

impl HvKick {
    pub const fn new(pump: &'static SharedHvPump<McpwmHvBoard>, wake: &'static HvWake) -> Self {
        Self { pump, wake }
    }
}

impl ImmediateCycle for HvKick {
    fn request_immediate_cycle(&mut self) {
        let primed = self.pump.with(|p| {
            p.request_immediate_cycle();
            p.hal().ready_pending()
        });
        if primed {
            self.wake.signal(());
        }
    }
}
