//! Host-side model of the HV pump hardware
//!
//! [`VirtualHvBoard`] implements [`HvPumpHal`] on top of a
//! [`VirtualEventBus`], a 16-bit cycle timer, a latched comparator and a
//! simple integer model of the tube bias capacitor. It lets the simulator
//! and the integration tests run the real controller end to end.
//!
//! ## Capacitor model
//!
//! - each charge pulse adds `on_ticks² / gain_divisor` millivolts, clamped
//! - leakage removes `leak_ppm_per_s` of the bias per second
//! - every tube discharge removes `drain_per_count_mv`
//! - the comparator latches when the bias is at or above the threshold at
//!   the end of a pulse

use heapless::Vec;
use log::trace;

use super::virtual_bus::{TaskSink, VirtualEventBus};
use super::{CompareSlot, EventRouter, HalResult, HvPumpHal, HwEvent, HwTask};
use crate::config::{HV_TIMER_FREQ_HZ, HV_TIMER_MAX_TICKS};
use crate::hv_pump::HvPump;
use crate::pulse_counter::SenseLine;

/// Bias capacitor and flyback transfer model, all in millivolts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacitorModel {
    pub voltage_mv: u32,
    pub threshold_mv: u32,
    pub clamp_mv: u32,
    pub gain_divisor: u64,
    pub leak_ppm_per_s: u32,
    pub drain_per_count_mv: u32,
}

impl Default for CapacitorModel {
    fn default() -> Self {
        Self {
            voltage_mv: 0,
            threshold_mv: 380_000,
            clamp_mv: 420_000,
            // 500 us work pulse at 16 MHz adds 20 V, the 250 us try pulse 5 V.
            gain_divisor: 3_200,
            leak_ppm_per_s: 20_000,
            drain_per_count_mv: 100,
        }
    }
}

impl CapacitorModel {
    fn pump(&mut self, on_ticks: u32) {
        let gain = (on_ticks as u64 * on_ticks as u64) / self.gain_divisor.max(1);
        let next = (self.voltage_mv as u64 + gain).min(self.clamp_mv as u64);
        self.voltage_mv = next as u32;
    }

    fn leak(&mut self, elapsed_ms: u64) {
        let loss = self.voltage_mv as u64 * self.leak_ppm_per_s as u64 * elapsed_ms / 1_000_000_000;
        self.voltage_mv = self.voltage_mv.saturating_sub(loss.min(u32::MAX as u64) as u32);
    }

    fn drain(&mut self, counts: u32) {
        let loss = counts.saturating_mul(self.drain_per_count_mv);
        self.voltage_mv = self.voltage_mv.saturating_sub(loss);
    }

    pub fn above_threshold(&self) -> bool {
        self.voltage_mv >= self.threshold_mv
    }
}

/// Peripheral state the routed tasks act on.
#[derive(Debug, Default)]
struct BoardIo {
    cap: CapacitorModel,
    tick: u32,
    timer_running: bool,
    pump_on_at: Option<u32>,
    comparator_armed: bool,
    comparator_latch: bool,
    discharge_active: bool,
    pump_pulses: u32,
    discharges: u32,
}

impl TaskSink for BoardIo {
    fn perform(&mut self, task: HwTask) {
        match task {
            HwTask::CycleStart => {
                self.tick = 0;
                self.timer_running = true;
            }
            HwTask::CycleStop => self.timer_running = false,
            HwTask::PumpOn => self.pump_on_at = Some(self.tick),
            HwTask::PumpOff => {
                if let Some(start) = self.pump_on_at.take() {
                    self.cap.pump(self.tick.saturating_sub(start));
                    self.pump_pulses += 1;
                    if self.comparator_armed && self.cap.above_threshold() {
                        self.comparator_latch = true;
                    }
                }
            }
            HwTask::DischargeOn => self.discharge_active = true,
            HwTask::DischargeOff => {
                if self.discharge_active {
                    self.discharges += 1;
                }
                self.discharge_active = false;
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct VirtualHvBoard {
    bus: VirtualEventBus,
    io: BoardIo,
    compares: [Option<u32>; 4],
    ready_pending: bool,
    now_ms: u64,
    pacing_deadline_ms: Option<u64>,
}

impl VirtualHvBoard {
    pub fn new(cap: CapacitorModel) -> Self {
        Self {
            io: BoardIo {
                cap,
                ..BoardIo::default()
            },
            ..Self::default()
        }
    }

    /// Move board time forward, applying capacitor leakage.
    pub fn advance_to(&mut self, now_ms: u64) {
        if now_ms > self.now_ms {
            self.io.cap.leak(now_ms - self.now_ms);
            self.now_ms = now_ms;
        }
    }

    /// Apply the bias drain of `counts` tube discharges.
    pub fn register_counts(&mut self, counts: u32) {
        self.io.cap.drain(counts);
    }

    /// Consume an expired pacing deadline.
    pub fn take_pacing_due(&mut self) -> bool {
        match self.pacing_deadline_ms {
            Some(deadline) if deadline <= self.now_ms => {
                self.pacing_deadline_ms = None;
                true
            }
            _ => false,
        }
    }

    /// Fire the comparator-ready event if the comparator was armed.
    pub fn take_comparator_ready(&mut self) -> bool {
        if !core::mem::take(&mut self.ready_pending) {
            return false;
        }
        self.bus.fire(HwEvent::ComparatorReady, &mut self.io);
        true
    }

    /// Run the started cycle timer to completion, firing compare events in
    /// tick order. Returns the compares that fired.
    pub fn run_cycle(&mut self) -> Vec<CompareSlot, 4> {
        let mut fired = Vec::new();
        if !self.io.timer_running {
            return fired;
        }

        let mut order: Vec<(u32, CompareSlot), 4> = Vec::new();
        for slot in CompareSlot::ALL {
            if let Some(ticks) = self.compares[slot.index()] {
                let _ = order.push((ticks, slot));
            }
        }
        order.sort_unstable_by_key(|&(ticks, _)| ticks);

        for (ticks, slot) in order {
            if !self.io.timer_running {
                break;
            }
            self.io.tick = ticks;
            self.bus.fire(HwEvent::CycleCompare(slot), &mut self.io);
            let _ = fired.push(slot);
        }
        // Without a routed stop the 16-bit counter would wrap; treat it as stopped.
        self.io.timer_running = false;
        trace!("VHB: cycle done, bias {} mV", self.io.cap.voltage_mv);
        fired
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn pacing_deadline_ms(&self) -> Option<u64> {
        self.pacing_deadline_ms
    }

    pub fn voltage_mv(&self) -> u32 {
        self.io.cap.voltage_mv
    }

    pub fn capacitor(&self) -> &CapacitorModel {
        &self.io.cap
    }

    pub fn pump_pulses(&self) -> u32 {
        self.io.pump_pulses
    }

    pub fn discharges(&self) -> u32 {
        self.io.discharges
    }

    pub fn bus(&self) -> &VirtualEventBus {
        &self.bus
    }
}

impl EventRouter for VirtualHvBoard {
    fn bind(&mut self, event: HwEvent, task: HwTask) -> HalResult<()> {
        self.bus.bind(event, task)
    }
}

impl HvPumpHal for VirtualHvBoard {
    fn timer_frequency_hz(&self) -> u32 {
        HV_TIMER_FREQ_HZ
    }

    fn timer_max_ticks(&self) -> u32 {
        HV_TIMER_MAX_TICKS
    }

    fn load_compare(&mut self, slot: CompareSlot, ticks: u32) {
        self.compares[slot.index()] = Some(ticks);
    }

    fn arm_comparator(&mut self) {
        self.io.comparator_armed = true;
        self.ready_pending = true;
    }

    fn disarm_comparator(&mut self) {
        self.io.comparator_armed = false;
        self.ready_pending = false;
    }

    fn comparator_crossed(&mut self) -> bool {
        core::mem::take(&mut self.io.comparator_latch)
    }

    fn schedule_pacing(&mut self, delay_ms: u32) {
        self.pacing_deadline_ms = Some(self.now_ms + delay_ms as u64);
    }

    fn cancel_pacing(&mut self) {
        self.pacing_deadline_ms = None;
    }
}

/// Complete any cycle the pump has started on the virtual board.
///
/// Returns `true` if a cycle ran.
pub fn run_pending_cycle(pump: &mut HvPump<VirtualHvBoard>) -> bool {
    if !pump.hal_mut().take_comparator_ready() {
        return false;
    }
    pump.on_comparator_ready();
    let fired = pump.hal_mut().run_cycle();
    for slot in fired {
        pump.on_cycle_compare(slot);
    }
    true
}

/// Advance the board to `now_ms` and run every cycle that falls due.
///
/// Returns the number of cycles run.
pub fn step_to(pump: &mut HvPump<VirtualHvBoard>, now_ms: u64) -> u32 {
    pump.hal_mut().advance_to(now_ms);
    let mut cycles = 0;
    // A kick may already have left a cycle in Priming.
    if run_pending_cycle(pump) {
        cycles += 1;
    }
    while pump.hal_mut().take_pacing_due() {
        pump.on_pacing_tick();
        if run_pending_cycle(pump) {
            cycles += 1;
        }
    }
    cycles
}

/// Pulse-sense line stand-in that counts quench/release pairs.
#[derive(Debug, Default)]
pub struct VirtualSenseLine {
    quenched: bool,
    pub edges: u32,
}

impl SenseLine for VirtualSenseLine {
    fn quench(&mut self) {
        self.quenched = true;
    }

    fn release(&mut self) {
        if self.quenched {
            self.edges += 1;
        }
        self.quenched = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HvPumpConfig;
    use crate::hv_pump::HvCycleState;

    fn pump_with(cap: CapacitorModel) -> HvPump<VirtualHvBoard> {
        HvPump::new(VirtualHvBoard::new(cap), &HvPumpConfig::default()).unwrap()
    }

    #[test]
    fn test_routed_pulse_charges_capacitor() {
        let mut pump = pump_with(CapacitorModel::default());
        pump.set_enabled(true);
        assert!(run_pending_cycle(&mut pump));

        // First pulse is the 4000-tick try pulse: 4000² / 3200 = 5000 mV.
        assert_eq!(pump.hal().voltage_mv(), 5_000);
        assert_eq!(pump.hal().pump_pulses(), 1);
        assert_eq!(pump.hal().discharges(), 1);
        assert_eq!(pump.state(), HvCycleState::Idle);
        assert_eq!(pump.attempts(), 1);
    }

    #[test]
    fn test_comparator_latches_only_above_threshold() {
        let cap = CapacitorModel {
            voltage_mv: 379_000,
            ..CapacitorModel::default()
        };
        let mut pump = pump_with(cap);
        pump.set_enabled(true);
        run_pending_cycle(&mut pump);

        assert!(pump.feedback_sufficient());
        assert_eq!(pump.stats().successful_cycles, 1);
    }

    #[test]
    fn test_pacing_runs_until_regulated() {
        let mut pump = pump_with(CapacitorModel::default());
        pump.set_enabled(true);

        let mut now = 0;
        while !pump.feedback_sufficient() && now < 5_000 {
            step_to(&mut pump, now);
            now += 1;
        }

        assert!(pump.feedback_sufficient(), "bias never reached threshold");
        assert!(pump.hal().voltage_mv() >= 380_000);
        // One try pulse, then work pulses of 20 V each.
        assert_eq!(pump.stats().total_pulses, 20);
    }

    #[test]
    fn test_leakage_and_drain() {
        let mut board = VirtualHvBoard::new(CapacitorModel {
            voltage_mv: 100_000,
            ..CapacitorModel::default()
        });
        board.advance_to(1_000);
        assert_eq!(board.voltage_mv(), 98_000);
        board.register_counts(10);
        assert_eq!(board.voltage_mv(), 97_000);
    }

    #[test]
    fn test_sense_line_counts_edges() {
        let mut sense = VirtualSenseLine::default();
        sense.quench();
        sense.release();
        sense.release();
        assert_eq!(sense.edges, 1);
    }
}
