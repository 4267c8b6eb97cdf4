use std::num::NonZeroUsize;

/// Defines on which steps a periodic side effect fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    every: NonZeroUsize,
}

impl Cadence {
    pub fn every(every: NonZeroUsize) -> Self {
        Self { every }
    }

    pub fn period(&self) -> usize {
        self.every.get()
    }

    /// Returns true if the side effect fires at `step`.
    #[inline]
    pub fn fires(&self, step: usize) -> bool {
        step % self.every.get() == 0
    }
}
