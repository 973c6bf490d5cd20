use std::ops::RangeInclusive;

/// Hop discovery frontier.
///
/// Each round probes every hop up to `current + lookahead`, then pushes the
/// frontier out by one until it reaches `max_hops`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopFrontier {
    current: u8,
    max_hops: u8,
    lookahead: u8,
}

impl HopFrontier {
    pub fn new(max_hops: u8, lookahead: u8) -> Self {
        Self {
            current: 1,
            max_hops: max_hops.max(1),
            lookahead,
        }
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    /// Hops to probe this round
    pub fn window(&self) -> RangeInclusive<u8> {
        1..=self.current.saturating_add(self.lookahead).min(self.max_hops)
    }

    pub fn advance(&mut self) {
        if self.current < self.max_hops {
            self.current += 1;
        }
    }
}
