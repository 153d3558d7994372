//! Visible plot window.

use serde::{Deserialize, Serialize};

/// Smallest span a box selection may produce.
pub const MIN_SELECTION_SPAN: f64 = 1e-5;

/// Default pan step as a percentage of the visible span.
pub const DEFAULT_OFFSET_PERCENT: f64 = 1.0;

/// Sentinel window sent to the server to ask for its full x extent.
pub const FULL_X_WINDOW: (f64, f64) = (-1_000_000.0, 1_000_000.0);

/// Bounds of one axis. A missing bound is derived from the data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl AxisRange {
    pub fn auto() -> Self {
        AxisRange::default()
    }

    pub fn fixed(min: f64, max: f64) -> Self {
        AxisRange {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Both bounds set by the operator or the server.
    pub fn is_explicit(&self) -> bool {
        self.min.is_some() && self.max.is_some()
    }

    pub fn explicit(&self) -> Option<(f64, f64)> {
        Some((self.min?, self.max?))
    }

    /// Effective bounds, filling missing ones from the data extent.
    pub fn resolve(&self, data: Option<(f64, f64)>) -> Option<(f64, f64)> {
        let min = self.min.or(data.map(|d| d.0))?;
        let max = self.max.or(data.map(|d| d.1))?;
        Some((min, max))
    }
}

/// Pan direction along an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Towards smaller values (left / down)
    Backward,
    /// Towards larger values (right / up)
    Forward,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewWindow {
    pub x: AxisRange,
    pub y: AxisRange,
}

impl ViewWindow {
    /// Automatic x, symmetric y of total height `y_span`.
    pub fn reset(y_span: f64) -> Self {
        let half = y_span / 2.0;
        ViewWindow {
            x: AxisRange::auto(),
            y: AxisRange::fixed(-half, half),
        }
    }
}

/// Shift a range by `percent` of its span.
pub fn shift(range: (f64, f64), percent: f64, direction: Direction) -> (f64, f64) {
    let offset = (range.1 - range.0) * percent / 100.0;
    match direction {
        Direction::Backward => (range.0 - offset, range.1 - offset),
        Direction::Forward => (range.0 + offset, range.1 + offset),
    }
}

/// Order a selection and widen it to at least [`MIN_SELECTION_SPAN`].
pub fn clamp_selection(from: f64, to: f64) -> (f64, f64) {
    let (lo, hi) = if from <= to { (from, to) } else { (to, from) };
    if hi - lo < MIN_SELECTION_SPAN {
        (lo, lo + MIN_SELECTION_SPAN)
    } else {
        (lo, hi)
    }
}

/// Data extent scaled by 10% on each side.
///
/// Each bound is scaled away from zero only when it lies on its own side of
/// zero: a negative minimum grows by 10% and a positive maximum grows by
/// 10%. Otherwise the bound shrinks toward zero. For a non-positive maximum
/// this gives `hi * 0.9`, which is above `hi`, not `hi + hi * 0.1`, which
/// would be below it.
///
/// `None` when the padded range would be empty.
pub fn padded_extent((lo, hi): (f64, f64)) -> Option<(f64, f64)> {
    let min = if lo < 0.0 { lo * 1.1 } else { lo * 0.9 };
    let max = if hi > 0.0 { hi * 1.1 } else { hi * 0.9 };
    (max > min).then_some((min, max))
}
