//! High-voltage bias generation for the Geiger tube.

pub mod controller;
pub mod timing;

pub use controller::{HvCycleState, HvPump, HvPumpStats, ImmediateCycle, SharedHvPump};
pub use timing::{CycleSchedule, HvTimingParams, TimingError, TimingResult};
