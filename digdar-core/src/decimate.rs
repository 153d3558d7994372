//! Stride decimation for display.
//!
//! A canvas cannot usefully show more than a handful of points per pixel,
//! so every redraw thins each series to at most `width * points_per_px`
//! samples by keeping the first sample of each stride window.

use crate::series::Point;

/// Default density budget (points per horizontal pixel).
pub const DEFAULT_POINTS_PER_PX: usize = 5;

/// Reduces sample series to a bounded point budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimator {
    /// `None` disables decimation entirely.
    points_per_px: Option<usize>,
}

impl Default for Decimator {
    fn default() -> Self {
        Decimator::new(Some(DEFAULT_POINTS_PER_PX))
    }
}

impl Decimator {
    pub fn new(points_per_px: Option<usize>) -> Self {
        Decimator { points_per_px }
    }

    /// Decimator that never drops samples.
    pub fn unlimited() -> Self {
        Decimator::new(None)
    }

    pub fn points_per_px(&self) -> Option<usize> {
        self.points_per_px
    }

    /// Point budget for a plot `width_px` wide, or `None` when unlimited.
    pub fn budget(&self, width_px: usize) -> Option<usize> {
        self.points_per_px.map(|d| width_px.saturating_mul(d))
    }

    /// Stride for `len` samples at `width_px`. A stride of 1 keeps everything.
    pub fn stride(&self, len: usize, width_px: usize) -> usize {
        match self.budget(width_px) {
            None => 1,
            // Zero budget keeps only the first sample
            Some(0) => len.max(1),
            Some(budget) if len > budget => len.div_ceil(budget),
            Some(_) => 1,
        }
    }

    /// Keep the first sample of every stride window, preserving order.
    pub fn apply(&self, points: &[Point], width_px: usize) -> Vec<Point> {
        let stride = self.stride(points.len(), width_px);
        if stride == 1 {
            return points.to_vec();
        }
        points.iter().step_by(stride).copied().collect()
    }
}
