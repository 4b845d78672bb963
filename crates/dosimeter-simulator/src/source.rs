//! Synthetic Geiger tube.

/// Deterministic pulse source at a given rate in counts per minute.
///
/// Keeps the fractional remainder between steps, so any step size yields
/// exactly `cpm` pulses per simulated minute.
#[derive(Debug, Clone)]
pub struct GeigerSource {
    cpm: u32,
    remainder: u64,
}

impl GeigerSource {
    pub fn new(cpm: u32) -> Self {
        Self { cpm, remainder: 0 }
    }

    pub fn set_cpm(&mut self, cpm: u32) {
        self.cpm = cpm;
    }

    pub fn cpm(&self) -> u32 {
        self.cpm
    }

    /// Pulses emitted during the next `step_ms`.
    pub fn advance(&mut self, step_ms: u64) -> u32 {
        self.remainder += self.cpm as u64 * step_ms;
        let pulses = self.remainder / 60_000;
        self.remainder %= 60_000;
        pulses as u32
    }
}
