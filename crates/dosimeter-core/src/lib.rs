//! Hardware-independent core library for dosimeter-rs
//!
//! This crate contains all platform-agnostic logic for the Geiger-Müller
//! dosimeter: the pulse edge counter, the flyback high-voltage pump
//! controller, the cascading dose-rate aggregator, the real-time alarm
//! watcher and the hourly event log, plus the HAL traits the firmware and
//! the simulator implement.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-C6) and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod alarm;
pub mod app_state;
pub mod config;
pub mod dose;
pub mod error;
pub mod event_log;
pub mod hal;
pub mod hv_pump;
pub mod pulse_counter;
pub mod sleep_lock;
pub mod time;
pub mod watcher;

pub use error::{DosimeterError, DosimeterResult};
