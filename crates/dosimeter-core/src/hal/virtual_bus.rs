//! Synchronous stand-in for the peripheral event-routing fabric.
//!
//! Routes live in a fixed table. Firing an event performs every bound task
//! immediately, in bind order, on the supplied [`TaskSink`].

use heapless::Vec;
use log::trace;

use super::{EventRouter, HalError, HalResult, HwEvent, HwTask};

/// Route channels available, matching the smallest fabric we target.
pub const VIRTUAL_ROUTE_CAPACITY: usize = 8;

/// Receiver of routed tasks.
pub trait TaskSink {
    fn perform(&mut self, task: HwTask);
}

#[derive(Debug, Default)]
pub struct VirtualEventBus {
    routes: Vec<(HwEvent, HwTask), VIRTUAL_ROUTE_CAPACITY>,
}

impl VirtualEventBus {
    pub const fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Perform every task bound to `event`. Returns how many ran.
    pub fn fire<S: TaskSink>(&self, event: HwEvent, sink: &mut S) -> usize {
        let mut performed = 0;
        for &(bound, task) in self.routes.iter() {
            if bound == event {
                trace!("BUS: {:?} -> {:?}", event, task);
                sink.perform(task);
                performed += 1;
            }
        }
        performed
    }

    /// Whether `event` drives `task`.
    pub fn is_bound(&self, event: HwEvent, task: HwTask) -> bool {
        self.routes.iter().any(|&r| r == (event, task))
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

impl EventRouter for VirtualEventBus {
    fn bind(&mut self, event: HwEvent, task: HwTask) -> HalResult<()> {
        // Re-binding an existing pair is harmless.
        if self.is_bound(event, task) {
            return Ok(());
        }
        self.routes
            .push((event, task))
            .map_err(|_| HalError::RouteTableFull {
                capacity: VIRTUAL_ROUTE_CAPACITY,
            })
    }
}
