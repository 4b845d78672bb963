use heapless::Deque;

use crate::config::TIMEFRAME_MAX_SLOTS;

/// One level of the dose-rate cascade.
///
/// Holds the last `size` sub-period sums of the level below. Each push
/// evicts the oldest slot and recomputes the volume as the ring sum. Every
/// `size` pushes the level completes a period and hands its volume up.
#[derive(Debug, Clone)]
pub struct TimeframeAccumulator {
    slots: Deque<u32, TIMEFRAME_MAX_SLOTS>,
    size: usize,
    volume: u32,
    fill: usize,
}

impl TimeframeAccumulator {
    /// Create a zero-filled level with `size` slots.
    ///
    /// `size` is clamped to `1..=TIMEFRAME_MAX_SLOTS`.
    pub fn new(size: usize) -> Self {
        let size = size.clamp(1, TIMEFRAME_MAX_SLOTS);
        let mut slots = Deque::new();
        for _ in 0..size {
            let _ = slots.push_back(0);
        }
        Self {
            slots,
            size,
            volume: 0,
            fill: 0,
        }
    }

    /// Push one sub-period sum. Returns the volume to carry into the next
    /// level when this push completes a period.
    pub fn push(&mut self, value: u32) -> Option<u32> {
        if self.slots.is_full() || self.slots.len() >= self.size {
            self.slots.pop_front();
        }
        let _ = self.slots.push_back(value);
        self.volume = self
            .slots
            .iter()
            .fold(0u32, |acc, &v| acc.saturating_add(v));

        self.fill += 1;
        if self.fill >= self.size {
            self.fill = 0;
            Some(self.volume)
        } else {
            None
        }
    }

    /// Sum of the slots currently held.
    pub fn volume(&self) -> u32 {
        self.volume
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Pushes since the last completed period.
    pub fn fill(&self) -> usize {
        self.fill
    }

    /// Slots oldest first.
    pub fn slots(&self) -> impl Iterator<Item = &u32> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_zero_filled() {
        let frame = TimeframeAccumulator::new(4);
        assert_eq!(frame.volume(), 0);
        assert_eq!(frame.slots().count(), 4);
        assert!(frame.slots().all(|&v| v == 0));
    }

    #[test]
    fn test_push_evicts_oldest() {
        let mut frame = TimeframeAccumulator::new(3);
        frame.push(1);
        frame.push(2);
        frame.push(3);
        frame.push(4);

        let slots: heapless::Vec<u32, 8> = frame.slots().copied().collect();
        assert_eq!(slots.as_slice(), &[2, 3, 4]);
        assert_eq!(frame.volume(), 9);
    }

    #[test]
    fn test_carry_every_size_pushes() {
        let mut frame = TimeframeAccumulator::new(4);
        assert_eq!(frame.push(1), None);
        assert_eq!(frame.push(2), None);
        assert_eq!(frame.push(3), None);
        assert_eq!(frame.push(4), Some(10), "fourth push completes the period");
        assert_eq!(frame.fill(), 0);

        // The window slides, but the next carry only comes four pushes later.
        assert_eq!(frame.push(5), None);
        assert_eq!(frame.volume(), 14);
        frame.push(0);
        frame.push(0);
        assert_eq!(frame.push(1), Some(6));
    }

    #[test]
    fn test_size_is_clamped() {
        assert_eq!(TimeframeAccumulator::new(0).size(), 1);
        assert_eq!(TimeframeAccumulator::new(99).size(), TIMEFRAME_MAX_SLOTS);
    }
}
