//! SOC event task matrix (ETM) channels for ESP32-C6
//!
//! Each channel connects one event ID to one task ID; the peripheral fires
//! the task on the event with no CPU involvement. esp-hal exposes typed ETM
//! channels only for the events it models, and MCPWM operator compares are
//! not among them, so channels are programmed here by ID. `Etm::new` from
//! esp-hal must have run first to clock the matrix.
//!
//! IDs follow the ESP32-C6 technical reference manual, "Event Task Matrix",
//! event and task tables.

use core::ptr::write_volatile;

use dosimeter_core::hal::{CompareSlot, HalError, HalResult};

const SOC_ETM_BASE: u32 = 0x6001_3000;
const CH_ENA_AD0_SET_REG: u32 = SOC_ETM_BASE + 0x04; // Channels 0-31
const CH_ENA_AD1_SET_REG: u32 = SOC_ETM_BASE + 0x10; // Channels 32-49
const CH0_EVT_ID_REG: u32 = SOC_ETM_BASE + 0x18;
const CH0_TASK_ID_REG: u32 = SOC_ETM_BASE + 0x1C;
const CH_STRIDE: u32 = 8;

/// Hardware channel count.
pub const ETM_CHANNELS: usize = 50;

// MCPWM0 operator compare events
const MCPWM0_EVT_OP0_TEA: u8 = 63;
const MCPWM0_EVT_OP1_TEA: u8 = 64;
const MCPWM0_EVT_OP0_TEB: u8 = 66;
const MCPWM0_EVT_OP1_TEB: u8 = 67;

/// ETM event raised when the cycle timer reaches `slot`'s compare value.
///
/// Operator 0 carries the pulse edges, operator 1 the window and discharge
/// ends; both follow MCPWM timer 0.
pub const fn compare_event_id(slot: CompareSlot) -> u8 {
    match slot {
        CompareSlot::PulseStart => MCPWM0_EVT_OP0_TEA,
        CompareSlot::PulseEnd => MCPWM0_EVT_OP0_TEB,
        CompareSlot::WindowEnd => MCPWM0_EVT_OP1_TEA,
        CompareSlot::DischargeEnd => MCPWM0_EVT_OP1_TEB,
    }
}

/// Allocator over the raw channels, handing them out in order.
pub struct EtmChannels {
    next: usize,
}

impl EtmChannels {
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Program and enable the next free channel. Returns its index.
    pub fn connect(&mut self, event_id: u8, task_id: u8) -> HalResult<usize> {
        if self.next >= ETM_CHANNELS {
            return Err(HalError::RouteTableFull {
                capacity: ETM_CHANNELS,
            });
        }
        let channel = self.next;
        self.next += 1;

        let offset = CH_STRIDE * channel as u32;
        let (enable_reg, bit) = if channel < 32 {
            (CH_ENA_AD0_SET_REG, 1u32 << channel)
        } else {
            (CH_ENA_AD1_SET_REG, 1u32 << (channel - 32))
        };
        critical_section::with(|_| unsafe {
            write_volatile((CH0_EVT_ID_REG + offset) as *mut u32, event_id as u32);
            write_volatile((CH0_TASK_ID_REG + offset) as *mut u32, task_id as u32);
            write_volatile(enable_reg as *mut u32, bit);
        });
        Ok(channel)
    }

    /// Channels in use.
    pub fn used(&self) -> usize {
        self.next
    }
}

impl Default for EtmChannels {
    fn default() -> Self {
        Self::new()
    }
}
