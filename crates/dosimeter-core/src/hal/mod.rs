//! Hardware abstraction for the HV pump
//!
//! The charge pulse is never timed by software. Instead the controller
//! declares, once at init, which hardware event drives which hardware task
//! (`bind(event, task)`), and the peripheral event-routing fabric performs
//! those actions on its own. Software only sees the events it needs to
//! advance the state machine.
//!
//! ## Routes used by the pump
//!
//! | Event | Task |
//! |-------|------|
//! | comparator ready | start cycle timer |
//! | compare `PulseStart` | pump on |
//! | compare `PulseEnd` | pump off |
//! | compare `WindowEnd` | discharge on, or stop timer |
//! | compare `DischargeEnd` | discharge off, stop timer |
//!
//! Firmware implements these traits on real peripherals; [`virtual_bus`]
//! and [`virtual_board`] provide a synchronous model for the simulator and
//! tests.

use thiserror_no_std::Error;

pub mod virtual_board;
pub mod virtual_bus;

pub use virtual_board::VirtualHvBoard;
pub use virtual_bus::VirtualEventBus;

/// Compare channels of the cycle control timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CompareSlot {
    PulseStart,
    PulseEnd,
    WindowEnd,
    DischargeEnd,
}

impl CompareSlot {
    pub const ALL: [CompareSlot; 4] = [
        CompareSlot::PulseStart,
        CompareSlot::PulseEnd,
        CompareSlot::WindowEnd,
        CompareSlot::DischargeEnd,
    ];

    pub const fn index(self) -> usize {
        match self {
            CompareSlot::PulseStart => 0,
            CompareSlot::PulseEnd => 1,
            CompareSlot::WindowEnd => 2,
            CompareSlot::DischargeEnd => 3,
        }
    }
}

/// Hardware event sources that can be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwEvent {
    /// The feedback comparator finished settling after being armed.
    ComparatorReady,
    /// The cycle timer reached the value loaded into a compare channel.
    CycleCompare(CompareSlot),
}

/// Hardware tasks an event can trigger without CPU involvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwTask {
    PumpOn,
    PumpOff,
    DischargeOn,
    DischargeOff,
    CycleStart,
    CycleStop,
}

/// Peripheral acquisition and routing failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// No free routing channel left
    #[error("Route table full (capacity {capacity})")]
    RouteTableFull {
        /// Number of routes the fabric can hold
        capacity: usize,
    },

    /// The fabric cannot connect this event to this task
    #[error("Unsupported route: {event:?} -> {task:?}")]
    UnsupportedRoute {
        /// Source event
        event: HwEvent,
        /// Target task
        task: HwTask,
    },

    /// A peripheral could not be claimed at init
    #[error("Resource unavailable: {resource}")]
    ResourceUnavailable {
        /// Name of the peripheral
        resource: &'static str,
    },
}

pub type HalResult<T> = Result<T, HalError>;

/// Declarative event-to-task routing.
pub trait EventRouter {
    /// Connect `event` to `task`. One event may drive several tasks; they run
    /// in bind order.
    fn bind(&mut self, event: HwEvent, task: HwTask) -> HalResult<()>;
}

/// Everything the HV pump controller needs from the board.
pub trait HvPumpHal: EventRouter {
    /// Tick rate of the cycle control timer.
    fn timer_frequency_hz(&self) -> u32;

    /// Largest value a compare channel can hold.
    fn timer_max_ticks(&self) -> u32;

    /// Load a compare channel. Takes effect on the next timer start.
    fn load_compare(&mut self, slot: CompareSlot, ticks: u32);

    /// Power up and start the feedback comparator. Raises
    /// [`HwEvent::ComparatorReady`] once it has settled.
    fn arm_comparator(&mut self);

    /// Power the comparator down.
    fn disarm_comparator(&mut self);

    /// Read and clear the latched "bias crossed the threshold" flag.
    fn comparator_crossed(&mut self) -> bool;

    /// (Re)start the single-shot pacing timer.
    fn schedule_pacing(&mut self, delay_ms: u32);

    /// Stop the pacing timer if it is running.
    fn cancel_pacing(&mut self);
}
