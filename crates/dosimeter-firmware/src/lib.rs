//! ESP32-C6 firmware-specific modules for dosimeter-rs
//!
//! This crate contains hardware-specific code that cannot compile on desktop
//! targets: MCPWM and ETM register programming for the HV pump, raw GPIO
//! access for the pulse-sense bias and the feedback latch, and the glue that
//! connects dosimeter-core's seams to embassy tasks.

#![no_std]

pub mod buzzer;
pub mod etm;
pub mod hv_board;
pub mod kick;
pub mod raw_pin;

// ---------------------------------------------------------------------------
// Pin map
// ---------------------------------------------------------------------------

/// Buzzer output.
pub const BUZZER_GPIO: u8 = 3;

/// Tube pulse input, falling edge per discharge.
pub const TUBE_GPIO: u8 = 4;

/// Flyback switch gate.
pub const PUMP_GPIO: u8 = 5;

/// Recuperation switch gate.
pub const DISCHARGE_GPIO: u8 = 6;

/// Power enable of the external feedback comparator.
pub const COMPARATOR_ENABLE_GPIO: u8 = 7;

/// Feedback comparator output, high once the bias reaches nominal.
pub const FEEDBACK_GPIO: u8 = 10;
