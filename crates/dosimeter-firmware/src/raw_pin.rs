//! Register-level GPIO helpers for ESP32-C6
//!
//! Two things the HAL driver types do not expose without owning the pin:
//! flipping the passive pull of an input while it stays configured for edge
//! interrupts, and latching an edge in the GPIO status register with the CPU
//! interrupt left disabled.
//!
//! Every access goes through a critical section.

use core::ptr::{read_volatile, write_volatile};

use dosimeter_core::pulse_counter::SenseLine;

// IO_MUX pad registers, one word per GPIO starting at GPIO0
const IO_MUX_GPIO0_REG: u32 = 0x6009_0004;
const IO_MUX_FUN_WPD: u32 = 1 << 7; // Weak pull-down
const IO_MUX_FUN_WPU: u32 = 1 << 8; // Weak pull-up

// GPIO matrix registers (single bank, GPIO 0-30)
const GPIO_STATUS_REG: u32 = 0x6009_1044; // Interrupt status, latched per pin
const GPIO_STATUS_W1TC_REG: u32 = 0x6009_104C; // Clear status bits
const GPIO_PIN0_REG: u32 = 0x6009_1074; // Per-pin config, one word per GPIO

const GPIO_PIN_INT_TYPE_SHIFT: u32 = 7;
const GPIO_PIN_INT_TYPE_MASK: u32 = 0b111 << GPIO_PIN_INT_TYPE_SHIFT;
const GPIO_PIN_INT_ENA_MASK: u32 = 0b1_1111 << 13;
const INT_TYPE_RISING_EDGE: u32 = 1;

/// A GPIO addressed by number through raw registers.
///
/// The const generic `PIN` is the GPIO number (0-30 on the ESP32-C6). The
/// pin must already be configured as an input by its owner; these helpers
/// only touch the pull and edge-latch bits.
pub struct RawPin<const PIN: u8> {
    _private: (),
}

impl<const PIN: u8> RawPin<PIN> {
    pub const fn new() -> Self {
        Self { _private: () }
    }

    #[inline]
    const fn io_mux_reg(&self) -> u32 {
        IO_MUX_GPIO0_REG + 4 * PIN as u32
    }

    #[inline]
    const fn pin_reg(&self) -> u32 {
        GPIO_PIN0_REG + 4 * PIN as u32
    }

    #[inline]
    const fn bit(&self) -> u32 {
        1u32 << PIN
    }

    /// Select the weak pull-up, or the weak pull-down when `up` is false.
    pub fn set_pull(&self, up: bool) {
        let reg = self.io_mux_reg();
        critical_section::with(|_| unsafe {
            let mut value = read_volatile(reg as *const u32);
            value &= !(IO_MUX_FUN_WPU | IO_MUX_FUN_WPD);
            value |= if up { IO_MUX_FUN_WPU } else { IO_MUX_FUN_WPD };
            write_volatile(reg as *mut u32, value);
        });
    }

    /// Latch rising edges in the status register without raising a CPU
    /// interrupt.
    pub fn latch_rising_edges(&self) {
        let reg = self.pin_reg();
        critical_section::with(|_| unsafe {
            let mut value = read_volatile(reg as *const u32);
            value &= !(GPIO_PIN_INT_TYPE_MASK | GPIO_PIN_INT_ENA_MASK);
            value |= INT_TYPE_RISING_EDGE << GPIO_PIN_INT_TYPE_SHIFT;
            write_volatile(reg as *mut u32, value);
        });
    }

    /// Read and clear the latched edge.
    pub fn take_latched(&self) -> bool {
        let bit = self.bit();
        critical_section::with(|_| unsafe {
            let set = read_volatile(GPIO_STATUS_REG as *const u32) & bit != 0;
            write_volatile(GPIO_STATUS_W1TC_REG as *mut u32, bit);
            set
        })
    }
}

impl<const PIN: u8> Default for RawPin<PIN> {
    fn default() -> Self {
        Self::new()
    }
}

/// Tube pulse input whose passive bias is flipped to pull-down while an
/// edge is being counted, then restored to the idle pull-up.
pub struct BiasSenseLine<const PIN: u8> {
    pin: RawPin<PIN>,
}

impl<const PIN: u8> BiasSenseLine<PIN> {
    pub const fn new() -> Self {
        Self { pin: RawPin::new() }
    }
}

impl<const PIN: u8> Default for BiasSenseLine<PIN> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const PIN: u8> SenseLine for BiasSenseLine<PIN> {
    fn quench(&mut self) {
        self.pin.set_pull(false);
    }

    fn release(&mut self) {
        self.pin.set_pull(true);
    }
}
