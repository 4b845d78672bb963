//! Low-power wait inhibitor
//!
//! Components that have deferred work for the next main-loop pass call
//! [`SleepLock::lock`]. The main loop calls [`SleepLock::take`] once per pass
//! and only enters the low-power wait when it returns `false`.

use core::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct SleepLock {
    locked: AtomicBool,
}

impl SleepLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Keep the main loop awake for one more pass. Safe from interrupts.
    pub fn lock(&self) {
        self.locked.store(true, Ordering::Release);
    }

    /// Read and clear.
    pub fn take(&self) -> bool {
        self.locked.swap(false, Ordering::AcqRel)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}
