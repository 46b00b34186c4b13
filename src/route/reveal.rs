//! Progressive reveal of a freshly fetched route.
//!
//! The polyline is shown in fixed-size index chunks, sized so the whole
//! route completes in a fixed number of frames regardless of point count.

/// Reveal progress over a polyline of `total` points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealAnimation {
    total: usize,
    chunk: usize,
    shown: usize,
}

impl RevealAnimation {
    /// Plan a reveal of `total` points over `frames` ticks.
    pub fn new(total: usize, frames: usize) -> Self {
        let frames = frames.max(1);
        Self {
            total,
            chunk: total.div_ceil(frames).max(1),
            shown: 0,
        }
    }

    /// Advance one frame and return how many points are now visible.
    pub fn tick(&mut self) -> usize {
        self.shown = (self.shown + self.chunk).min(self.total);
        self.shown
    }

    pub fn shown(&self) -> usize {
        self.shown
    }

    pub fn chunk(&self) -> usize {
        self.chunk
    }

    pub fn is_complete(&self) -> bool {
        self.shown >= self.total
    }
}
