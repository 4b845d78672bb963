//! HV pump board support: MCPWM cycle timer, ETM routes, feedback comparator
//!
//! The cycle timer is MCPWM0 timer 0 at 16 MHz, counting up from zero. The
//! four compare slots live in the comparators of operators 0 and 1, which
//! both follow timer 0. Routes from a compare to a pump or discharge pin
//! edge become ETM channels; the two routes the ETM cannot express map onto
//! the timer itself:
//!
//! | Route | Realization |
//! |-------|-------------|
//! | compare -> pin set/clear | ETM channel, MCPWM event to GPIO task |
//! | compare -> cycle stop | timer period = compare value, "stop at TEP" |
//! | comparator ready -> cycle start | started from the HV task after the settle delay |
//!
//! The feedback comparator is an external part powered through an enable
//! pin; its output edge is latched in the GPIO status register.

use core::ptr::{read_volatile, write_volatile};

use embassy_time::{Duration, Instant};
use esp_hal::gpio::Output;
use heapless::Vec;
use log::debug;

use dosimeter_core::config::{HV_TIMER_FREQ_HZ, HV_TIMER_MAX_TICKS};
use dosimeter_core::hal::{
    CompareSlot, EventRouter, HalError, HalResult, HvPumpHal, HwEvent, HwTask,
};

use crate::etm::{compare_event_id, EtmChannels};
use crate::raw_pin::RawPin;
use crate::FEEDBACK_GPIO;

const MCPWM0_BASE: u32 = 0x6001_4000;
const TIMER0_CFG0_REG: u32 = MCPWM0_BASE + 0x04;
const TIMER0_CFG1_REG: u32 = MCPWM0_BASE + 0x08;
const GEN0_TSTMP_A_REG: u32 = MCPWM0_BASE + 0x44;
const GEN0_TSTMP_B_REG: u32 = MCPWM0_BASE + 0x48;
const GEN1_TSTMP_A_REG: u32 = MCPWM0_BASE + 0x7C;
const GEN1_TSTMP_B_REG: u32 = MCPWM0_BASE + 0x80;
const EVT_EN_REG: u32 = MCPWM0_BASE + 0x120;

const TIMER_PERIOD_SHIFT: u32 = 8;
const TIMER_PERIOD_MASK: u32 = 0xFFFF << TIMER_PERIOD_SHIFT;
const TIMER_START_MASK: u32 = 0b111;
const TIMER_START_STOP_AT_TEZ: u32 = 0;
const TIMER_START_STOP_AT_TEP: u32 = 4;

const fn compare_reg(slot: CompareSlot) -> u32 {
    match slot {
        CompareSlot::PulseStart => GEN0_TSTMP_A_REG,
        CompareSlot::PulseEnd => GEN0_TSTMP_B_REG,
        CompareSlot::WindowEnd => GEN1_TSTMP_A_REG,
        CompareSlot::DischargeEnd => GEN1_TSTMP_B_REG,
    }
}

const fn compare_event_enable(slot: CompareSlot) -> u32 {
    match slot {
        CompareSlot::PulseStart => 1 << 12,
        CompareSlot::WindowEnd => 1 << 13,
        CompareSlot::PulseEnd => 1 << 15,
        CompareSlot::DischargeEnd => 1 << 16,
    }
}

fn modify_reg(reg: u32, clear: u32, set: u32) {
    critical_section::with(|_| unsafe {
        let value = read_volatile(reg as *const u32);
        write_volatile(reg as *mut u32, (value & !clear) | set);
    });
}

/// ETM task IDs of the GPIO set/clear tasks wired to the pump and
/// discharge switches, as assigned by esp-hal's GPIO ETM channels.
#[derive(Debug, Clone, Copy)]
pub struct GpioTaskIds {
    pub pump_on: u8,
    pub pump_off: u8,
    pub discharge_on: u8,
    pub discharge_off: u8,
}

impl GpioTaskIds {
    fn for_task(&self, task: HwTask) -> Option<u8> {
        match task {
            HwTask::PumpOn => Some(self.pump_on),
            HwTask::PumpOff => Some(self.pump_off),
            HwTask::DischargeOn => Some(self.discharge_on),
            HwTask::DischargeOff => Some(self.discharge_off),
            HwTask::CycleStart | HwTask::CycleStop => None,
        }
    }
}

pub struct McpwmHvBoard {
    etm: EtmChannels,
    gpio_tasks: GpioTaskIds,
    start_on_ready: bool,
    stop_slot: Option<CompareSlot>,
    compares: [Option<u32>; 4],
    comparator_enable: Output<'static>,
    feedback: RawPin<FEEDBACK_GPIO>,
    ready_pending: bool,
    pacing_deadline: Option<Instant>,
}

impl McpwmHvBoard {
    /// Build the board on an MCPWM0 that esp-hal has already clocked, with
    /// timer 0 in up-count mode and operators 0 and 1 attached to it.
    pub fn new(gpio_tasks: GpioTaskIds, comparator_enable: Output<'static>) -> Self {
        // Park the timer at zero until the first routed start.
        modify_reg(TIMER0_CFG1_REG, TIMER_START_MASK, TIMER_START_STOP_AT_TEZ);
        let feedback = RawPin::new();
        feedback.latch_rising_edges();
        Self {
            etm: EtmChannels::new(),
            gpio_tasks,
            start_on_ready: false,
            stop_slot: None,
            compares: [None; 4],
            comparator_enable,
            feedback,
            ready_pending: false,
            pacing_deadline: None,
        }
    }

    /// If the comparator was armed, run the routed cycle start.
    ///
    /// Returns how long the started cycle runs.
    pub fn fire_comparator_ready(&mut self) -> Option<Duration> {
        if !core::mem::take(&mut self.ready_pending) {
            return None;
        }
        if self.start_on_ready {
            modify_reg(TIMER0_CFG1_REG, TIMER_START_MASK, TIMER_START_STOP_AT_TEP);
        }
        Some(self.cycle_span())
    }

    /// Whether a cycle is primed and waiting for the comparator to settle.
    pub fn ready_pending(&self) -> bool {
        self.ready_pending
    }

    /// Loaded compare slots up to the stop slot, in tick order.
    pub fn cycle_slots(&self) -> Vec<CompareSlot, 4> {
        let stop = self.stop_ticks();
        let mut order: Vec<(u32, CompareSlot), 4> = Vec::new();
        for slot in CompareSlot::ALL {
            if let Some(ticks) = self.compares[slot.index()] {
                if ticks <= stop {
                    let _ = order.push((ticks, slot));
                }
            }
        }
        order.sort_unstable_by_key(|&(ticks, _)| ticks);
        order.into_iter().map(|(_, slot)| slot).collect()
    }

    pub fn pacing_deadline(&self) -> Option<Instant> {
        self.pacing_deadline
    }

    /// Consume the pacing deadline if it has passed.
    pub fn take_pacing_due(&mut self, now: Instant) -> bool {
        match self.pacing_deadline {
            Some(deadline) if deadline <= now => {
                self.pacing_deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn etm_channels_used(&self) -> usize {
        self.etm.used()
    }

    fn stop_ticks(&self) -> u32 {
        self.stop_slot
            .and_then(|slot| self.compares[slot.index()])
            .unwrap_or(HV_TIMER_MAX_TICKS)
    }

    fn cycle_span(&self) -> Duration {
        let ticks_per_us = (HV_TIMER_FREQ_HZ / 1_000_000).max(1);
        Duration::from_micros((self.stop_ticks() / ticks_per_us) as u64 + 1)
    }
}

impl EventRouter for McpwmHvBoard {
    fn bind(&mut self, event: HwEvent, task: HwTask) -> HalResult<()> {
        match (event, task) {
            (HwEvent::ComparatorReady, HwTask::CycleStart) => {
                self.start_on_ready = true;
                Ok(())
            }
            (HwEvent::CycleCompare(slot), HwTask::CycleStop) => {
                self.stop_slot = Some(slot);
                Ok(())
            }
            (HwEvent::CycleCompare(slot), _) => {
                let task_id = self
                    .gpio_tasks
                    .for_task(task)
                    .ok_or(HalError::UnsupportedRoute { event, task })?;
                modify_reg(EVT_EN_REG, 0, compare_event_enable(slot));
                let channel = self.etm.connect(compare_event_id(slot), task_id)?;
                debug!("ETM: channel {} {:?} -> {:?}", channel, slot, task);
                Ok(())
            }
            _ => Err(HalError::UnsupportedRoute { event, task }),
        }
    }
}

impl HvPumpHal for McpwmHvBoard {
    fn timer_frequency_hz(&self) -> u32 {
        HV_TIMER_FREQ_HZ
    }

    fn timer_max_ticks(&self) -> u32 {
        HV_TIMER_MAX_TICKS
    }

    fn load_compare(&mut self, slot: CompareSlot, ticks: u32) {
        self.compares[slot.index()] = Some(ticks);
        critical_section::with(|_| unsafe {
            write_volatile(compare_reg(slot) as *mut u32, ticks & 0xFFFF);
        });
        if self.stop_slot == Some(slot) {
            modify_reg(
                TIMER0_CFG0_REG,
                TIMER_PERIOD_MASK,
                (ticks & 0xFFFF) << TIMER_PERIOD_SHIFT,
            );
        }
    }

    fn arm_comparator(&mut self) {
        self.comparator_enable.set_high();
        self.ready_pending = true;
    }

    fn disarm_comparator(&mut self) {
        self.comparator_enable.set_low();
        self.ready_pending = false;
    }

    fn comparator_crossed(&mut self) -> bool {
        self.feedback.take_latched()
    }

    fn schedule_pacing(&mut self, delay_ms: u32) {
        self.pacing_deadline = Some(Instant::now() + Duration::from_millis(delay_ms as u64));
    }

    fn cancel_pacing(&mut self) {
        self.pacing_deadline = None;
    }
}
