//! Flyback converter controller
//!
//! # Cycle
//!
//! ```text
//! Idle --pacing/kick--> Priming --comparator ready--> Pulsing
//!   ^                                                   |
//!   |                                              PulseEnd
//!   |                                                   v
//!   +---- DischargeEnd ---- Discharging <-- WindowEnd -- Observing
//!   +------------------- WindowEnd (no discharge) -------+
//! ```
//!
//! Pulse edges are produced by routed timer compares; the controller only
//! loads the compare values and reacts to the events it is told about. Each
//! handler runs in interrupt context on the firmware and is cheap.
//!
//! # Pacing
//!
//! The first pulse of a charging sequence uses the short "try" on-time, all
//! following pulses the "work" on-time. After a cycle:
//! - feedback seen: attempts reset, next cycle after the steady interval
//! - no feedback, cap not reached: next cycle after the charging interval
//! - no feedback, cap reached: sequence abandoned, attempts reset, next
//!   sequence starts after the charging interval

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use log::{debug, trace, warn};

use super::timing::{CycleSchedule, HvTimingParams};
use crate::config::HvPumpConfig;
use crate::error::DosimeterResult;
use crate::hal::{CompareSlot, EventRouter, HalResult, HvPumpHal, HwEvent, HwTask};

/// Phase of the current pump attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvCycleState {
    Idle,
    Priming,
    Pulsing,
    Observing,
    Discharging,
}

/// Read-only diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HvPumpStats {
    /// Charge pulses started since boot.
    pub total_pulses: u32,
    /// Cycles that ended with the feedback comparator firing.
    pub successful_cycles: u32,
    /// Charging sequences given up after the attempt cap.
    pub abandoned_sequences: u32,
    /// Immediate-cycle requests dropped because a cycle was running or the
    /// pump was disabled.
    pub ignored_kicks: u32,
}

/// Something that can ask the HV pump for an out-of-band cycle.
pub trait ImmediateCycle {
    fn request_immediate_cycle(&mut self);
}

pub struct HvPump<H: HvPumpHal> {
    hal: H,
    timing: HvTimingParams,
    state: HvCycleState,
    attempts: u8,
    abandoned: bool,
    feedback_sufficient: bool,
    enabled: bool,
    stats: HvPumpStats,
}

impl<H: HvPumpHal> HvPump<H> {
    /// Derive the timing recipe for the board's timer and bind the routes.
    ///
    /// The pump starts disabled; call [`set_enabled`](Self::set_enabled).
    pub fn new(mut hal: H, config: &HvPumpConfig) -> DosimeterResult<Self> {
        let timing =
            HvTimingParams::derive(config, hal.timer_frequency_hz(), hal.timer_max_ticks())?;
        bind_routes(&mut hal, timing.work_cycle.discharge_end.is_some())?;
        debug!(
            "HVP: try {} ticks, work {} ticks, cycle ends at {}",
            timing.try_cycle.on_ticks(),
            timing.work_cycle.on_ticks(),
            timing.work_cycle.last_tick()
        );

        Ok(Self {
            hal,
            timing,
            state: HvCycleState::Idle,
            attempts: 0,
            abandoned: false,
            feedback_sufficient: false,
            enabled: false,
            stats: HvPumpStats::default(),
        })
    }

    /// Enable or disable the converter. Enabling starts a charging sequence
    /// right away, or once a cycle still running has ended; disabling lets a
    /// running cycle finish and stops pacing.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        if enabled {
            debug!("HVP: enabled");
            if self.state == HvCycleState::Idle {
                self.attempts = 0;
                self.abandoned = false;
                self.start_cycle();
            }
        } else {
            debug!("HVP: disabled");
            self.hal.cancel_pacing();
            self.feedback_sufficient = false;
        }
    }

    /// Pacing timer expired.
    pub fn on_pacing_tick(&mut self) {
        if !self.enabled || self.state != HvCycleState::Idle {
            return;
        }
        self.start_cycle();
    }

    /// Comparator settled; the routed start has already launched the timer.
    pub fn on_comparator_ready(&mut self) {
        if self.state != HvCycleState::Priming {
            return;
        }
        self.stats.total_pulses = self.stats.total_pulses.wrapping_add(1);
        self.state = HvCycleState::Pulsing;
        trace!("HVP: pulsing, attempt {}", self.attempts);
    }

    /// A cycle timer compare that software subscribes to has fired.
    pub fn on_cycle_compare(&mut self, slot: CompareSlot) {
        match (self.state, slot) {
            (HvCycleState::Pulsing, CompareSlot::PulseEnd) => {
                self.state = HvCycleState::Observing;
            }
            // A missed PulseEnd interrupt must not stall the cycle.
            (HvCycleState::Pulsing | HvCycleState::Observing, CompareSlot::WindowEnd) => {
                self.finish_observation();
            }
            (HvCycleState::Discharging, CompareSlot::DischargeEnd) => {
                self.end_cycle();
            }
            _ => {}
        }
    }

    /// Run a cycle now if the pump is idle. Otherwise nothing happens.
    pub fn request_immediate_cycle(&mut self) {
        if !self.enabled || self.state != HvCycleState::Idle {
            self.stats.ignored_kicks = self.stats.ignored_kicks.wrapping_add(1);
            return;
        }
        debug!("HVP: immediate cycle");
        self.start_cycle();
    }

    pub fn state(&self) -> HvCycleState {
        self.state
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    /// Whether the most recent cycle saw the bias reach the threshold.
    pub fn feedback_sufficient(&self) -> bool {
        self.feedback_sufficient
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn stats(&self) -> HvPumpStats {
        self.stats
    }

    pub fn timing(&self) -> &HvTimingParams {
        &self.timing
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn start_cycle(&mut self) {
        self.hal.cancel_pacing();
        let cycle: CycleSchedule = *self.timing.cycle_for_attempt(self.attempts);
        self.hal.load_compare(CompareSlot::PulseStart, cycle.pulse_start);
        self.hal.load_compare(CompareSlot::PulseEnd, cycle.pulse_end);
        self.hal.load_compare(CompareSlot::WindowEnd, cycle.window_end);
        if let Some(end) = cycle.discharge_end {
            self.hal.load_compare(CompareSlot::DischargeEnd, end);
        }
        // Drop a stale crossing from the previous cycle.
        let _ = self.hal.comparator_crossed();
        self.state = HvCycleState::Priming;
        self.hal.arm_comparator();
    }

    fn finish_observation(&mut self) {
        let crossed = self.hal.comparator_crossed();
        self.hal.disarm_comparator();

        if crossed {
            self.feedback_sufficient = true;
            self.attempts = 0;
            self.stats.successful_cycles = self.stats.successful_cycles.wrapping_add(1);
            trace!("HVP: feedback ok");
        } else {
            self.feedback_sufficient = false;
            self.attempts = self.attempts.saturating_add(1);
            if self.attempts >= self.timing.max_attempts {
                warn!(
                    "HVP: no feedback after {} pulses, starting a new sequence",
                    self.attempts
                );
                self.attempts = 0;
                self.abandoned = true;
                self.stats.abandoned_sequences = self.stats.abandoned_sequences.wrapping_add(1);
            }
        }

        if self.timing.work_cycle.discharge_end.is_some() {
            self.state = HvCycleState::Discharging;
        } else {
            self.end_cycle();
        }
    }

    fn end_cycle(&mut self) {
        self.state = HvCycleState::Idle;
        if !self.enabled {
            return;
        }
        let still_charging = self.attempts > 0 || core::mem::take(&mut self.abandoned);
        let delay = if still_charging {
            self.timing.charging_interval_ms
        } else {
            self.timing.steady_interval_ms
        };
        self.hal.schedule_pacing(delay);
    }
}

impl<H: HvPumpHal> ImmediateCycle for HvPump<H> {
    fn request_immediate_cycle(&mut self) {
        HvPump::request_immediate_cycle(self);
    }
}

fn bind_routes<R: EventRouter>(router: &mut R, with_discharge: bool) -> HalResult<()> {
    router.bind(HwEvent::ComparatorReady, HwTask::CycleStart)?;
    router.bind(HwEvent::CycleCompare(CompareSlot::PulseStart), HwTask::PumpOn)?;
    router.bind(HwEvent::CycleCompare(CompareSlot::PulseEnd), HwTask::PumpOff)?;
    if with_discharge {
        router.bind(HwEvent::CycleCompare(CompareSlot::WindowEnd), HwTask::DischargeOn)?;
        let end = HwEvent::CycleCompare(CompareSlot::DischargeEnd);
        router.bind(end, HwTask::DischargeOff)?;
        router.bind(end, HwTask::CycleStop)?;
    } else {
        router.bind(HwEvent::CycleCompare(CompareSlot::WindowEnd), HwTask::CycleStop)?;
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Shared access
// ----------------------------------------------------------------------------

/// The pump behind a critical-section mutex, so interrupt handlers and the
/// main loop can both drive it.
pub struct SharedHvPump<H: HvPumpHal> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<HvPump<H>>>,
}

impl<H: HvPumpHal> SharedHvPump<H> {
    pub const fn new(pump: HvPump<H>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(pump)),
        }
    }

    /// Run `f` with exclusive access to the pump, interrupts masked.
    pub fn with<R>(&self, f: impl FnOnce(&mut HvPump<H>) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }
}

impl<H: HvPumpHal> ImmediateCycle for &SharedHvPump<H> {
    fn request_immediate_cycle(&mut self) {
        self.with(|pump| pump.request_immediate_cycle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HV_MAX_ATTEMPTS;
    use crate::hal::{HalError, VirtualEventBus};
    use heapless::Vec;

    /// Minimal scripted board: records compares and pacing, returns a
    /// scripted comparator result.
    #[derive(Default)]
    struct ScriptedBoard {
        bus: VirtualEventBus,
        compares: [Option<u32>; 4],
        armed: bool,
        crossed: bool,
        pacing: Option<u32>,
        arm_count: u32,
    }

    impl EventRouter for ScriptedBoard {
        fn bind(&mut self, event: HwEvent, task: HwTask) -> HalResult<()> {
            self.bus.bind(event, task)
        }
    }

    impl HvPumpHal for ScriptedBoard {
        fn timer_frequency_hz(&self) -> u32 {
            16_000_000
        }
        fn timer_max_ticks(&self) -> u32 {
            u16::MAX as u32
        }
        fn load_compare(&mut self, slot: CompareSlot, ticks: u32) {
            self.compares[slot.index()] = Some(ticks);
        }
        fn arm_comparator(&mut self) {
            self.armed = true;
            self.arm_count += 1;
        }
        fn disarm_comparator(&mut self) {
            self.armed = false;
        }
        fn comparator_crossed(&mut self) -> bool {
            core::mem::take(&mut self.crossed)
        }
        fn schedule_pacing(&mut self, delay_ms: u32) {
            self.pacing = Some(delay_ms);
        }
        fn cancel_pacing(&mut self) {
            self.pacing = None;
        }
    }

    fn pump() -> HvPump<ScriptedBoard> {
        HvPump::new(ScriptedBoard::default(), &HvPumpConfig::default()).unwrap()
    }

    /// Drive one full cycle; `crossed` scripts the comparator.
    fn run_cycle(pump: &mut HvPump<ScriptedBoard>, crossed: bool) {
        assert_eq!(pump.state(), HvCycleState::Priming);
        pump.on_comparator_ready();
        pump.on_cycle_compare(CompareSlot::PulseEnd);
        pump.hal_mut().crossed = crossed;
        pump.on_cycle_compare(CompareSlot::WindowEnd);
        pump.on_cycle_compare(CompareSlot::DischargeEnd);
        assert_eq!(pump.state(), HvCycleState::Idle);
    }

    #[test]
    fn test_routes_bound_at_init() {
        let pump = pump();
        let bus = &pump.hal().bus;
        assert!(bus.is_bound(HwEvent::ComparatorReady, HwTask::CycleStart));
        assert!(bus.is_bound(
            HwEvent::CycleCompare(CompareSlot::PulseEnd),
            HwTask::PumpOff
        ));
        assert!(bus.is_bound(
            HwEvent::CycleCompare(CompareSlot::DischargeEnd),
            HwTask::CycleStop
        ));
        assert_eq!(bus.route_count(), 6);
    }

    #[test]
    fn test_starts_disabled() {
        let mut pump = pump();
        pump.on_pacing_tick();
        assert_eq!(pump.state(), HvCycleState::Idle);
        assert_eq!(pump.hal().arm_count, 0);
    }

    #[test]
    fn test_early_success_single_try_pulse() {
        let mut pump = pump();
        pump.set_enabled(true);

        let try_end = pump.timing().try_cycle.pulse_end;
        assert_eq!(pump.hal().compares[CompareSlot::PulseEnd.index()], Some(try_end));

        run_cycle(&mut pump, true);

        assert_eq!(pump.stats().total_pulses, 1);
        assert!(pump.feedback_sufficient());
        assert_eq!(pump.attempts(), 0);
        assert_eq!(pump.hal().pacing, Some(pump.timing().steady_interval_ms));
    }

    #[test]
    fn test_work_on_time_after_failed_try() {
        let mut pump = pump();
        pump.set_enabled(true);
        run_cycle(&mut pump, false);

        assert_eq!(pump.attempts(), 1);
        assert_eq!(pump.hal().pacing, Some(pump.timing().charging_interval_ms));

        pump.on_pacing_tick();
        let work_end = pump.timing().work_cycle.pulse_end;
        assert_eq!(pump.hal().compares[CompareSlot::PulseEnd.index()], Some(work_end));
    }

    #[test]
    fn test_attempt_cap_abandons_sequence() {
        let mut pump = pump();
        pump.set_enabled(true);

        let mut pulses: Vec<u8, 128> = Vec::new();
        for _ in 0..HV_MAX_ATTEMPTS {
            run_cycle(&mut pump, false);
            pulses.push(pump.attempts()).unwrap();
            assert!(
                pump.attempts() < HV_MAX_ATTEMPTS,
                "attempt counter must stay below the cap"
            );
            if pump.attempts() == 0 {
                break;
            }
            pump.on_pacing_tick();
        }

        assert_eq!(pulses.len(), HV_MAX_ATTEMPTS as usize);
        assert_eq!(pump.stats().total_pulses, HV_MAX_ATTEMPTS as u32);
        assert_eq!(pump.stats().abandoned_sequences, 1);
        assert_eq!(pump.attempts(), 0);
        assert_eq!(pump.hal().pacing, Some(pump.timing().charging_interval_ms));

        // The next sequence opens with a try pulse again.
        pump.on_pacing_tick();
        let try_end = pump.timing().try_cycle.pulse_end;
        assert_eq!(pump.hal().compares[CompareSlot::PulseEnd.index()], Some(try_end));
        run_cycle(&mut pump, true);
        assert_eq!(pump.hal().pacing, Some(pump.timing().steady_interval_ms));
    }

    #[test]
    fn test_kick_ignored_while_not_idle() {
        let mut pump = pump();
        pump.set_enabled(true);
        assert_eq!(pump.state(), HvCycleState::Priming);

        let before = pump.hal().arm_count;
        pump.request_immediate_cycle();
        pump.on_comparator_ready();
        pump.request_immediate_cycle();

        assert_eq!(pump.state(), HvCycleState::Pulsing);
        assert_eq!(pump.attempts(), 0);
        assert_eq!(pump.hal().arm_count, before);
        assert_eq!(pump.stats().total_pulses, 1);
        assert_eq!(pump.stats().ignored_kicks, 2);
    }

    #[test]
    fn test_kick_from_idle_starts_cycle() {
        let mut pump = pump();
        pump.set_enabled(true);
        run_cycle(&mut pump, true);

        pump.request_immediate_cycle();
        assert_eq!(pump.state(), HvCycleState::Priming);
        assert_eq!(pump.hal().pacing, None, "kick restarts the pacing");
    }

    #[test]
    fn test_disable_stops_pacing() {
        let mut pump = pump();
        pump.set_enabled(true);
        pump.on_comparator_ready();
        pump.set_enabled(false);
        pump.on_cycle_compare(CompareSlot::PulseEnd);
        pump.on_cycle_compare(CompareSlot::WindowEnd);
        pump.on_cycle_compare(CompareSlot::DischargeEnd);

        assert_eq!(pump.state(), HvCycleState::Idle);
        assert_eq!(pump.hal().pacing, None);
        pump.request_immediate_cycle();
        assert_eq!(pump.state(), HvCycleState::Idle);
    }

    #[test]
    fn test_reenable_mid_cycle_keeps_running_cycle() {
        let mut pump = pump();
        pump.set_enabled(true);
        run_cycle(&mut pump, false);
        pump.on_pacing_tick();
        pump.on_comparator_ready();
        let compares = pump.hal().compares;
        let arms = pump.hal().arm_count;

        pump.set_enabled(false);
        pump.set_enabled(true);

        assert_eq!(pump.state(), HvCycleState::Pulsing);
        assert_eq!(pump.attempts(), 1);
        assert_eq!(pump.hal().compares, compares);
        assert_eq!(pump.hal().arm_count, arms);
        assert_eq!(pump.stats().total_pulses, 2);

        pump.on_cycle_compare(CompareSlot::PulseEnd);
        pump.on_cycle_compare(CompareSlot::WindowEnd);
        pump.on_cycle_compare(CompareSlot::DischargeEnd);
        assert_eq!(pump.state(), HvCycleState::Idle);
        assert_eq!(pump.hal().pacing, Some(pump.timing().charging_interval_ms));
    }

    #[test]
    fn test_route_failure_is_reported() {
        struct FullBoard(ScriptedBoard);
        impl EventRouter for FullBoard {
            fn bind(&mut self, _: HwEvent, _: HwTask) -> HalResult<()> {
                Err(HalError::RouteTableFull { capacity: 0 })
            }
        }
        impl HvPumpHal for FullBoard {
            fn timer_frequency_hz(&self) -> u32 {
                self.0.timer_frequency_hz()
            }
            fn timer_max_ticks(&self) -> u32 {
                self.0.timer_max_ticks()
            }
            fn load_compare(&mut self, slot: CompareSlot, ticks: u32) {
                self.0.load_compare(slot, ticks)
            }
            fn arm_comparator(&mut self) {}
            fn disarm_comparator(&mut self) {}
            fn comparator_crossed(&mut self) -> bool {
                false
            }
            fn schedule_pacing(&mut self, _: u32) {}
            fn cancel_pacing(&mut self) {}
        }

        let result = HvPump::new(FullBoard(ScriptedBoard::default()), &HvPumpConfig::default());
        assert!(matches!(
            result,
            Err(crate::DosimeterError::Hal(HalError::RouteTableFull { .. }))
        ));
    }

    #[test]
    fn test_shared_pump_kick() {
        let mut inner = pump();
        inner.set_enabled(true);
        run_cycle(&mut inner, true);
        let shared = SharedHvPump::new(inner);

        let mut kicker = &shared;
        kicker.request_immediate_cycle();

        assert_eq!(shared.with(|p| p.state()), HvCycleState::Priming);
    }
}
