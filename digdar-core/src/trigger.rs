//! Trigger level overlay.
//!
//! The excite and relax levels of the active trigger source are drawn as two
//! flat marker series across the visible x range. The overlay is left out
//! when it would carry no information.

use serde::Serialize;

use crate::params::{ParameterSet, TriggerMode};
use crate::series::Point;

/// Points per overlay series.
pub const OVERLAY_POINTS: usize = 40;

/// Glyph drawn at each overlay point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Marker {
    /// Excite level
    Plus,
    /// Relax level
    Minus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlaySeries {
    pub marker: Marker,
    pub level: f64,
    pub points: Vec<Point>,
}

/// Both level series, excite first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerOverlay {
    pub excite: OverlaySeries,
    pub relax: OverlaySeries,
}

/// Why no overlay was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Suppression {
    /// Continuous mode ignores the trigger levels
    Continuous,
    /// The trigger source has no level parameters
    NoLevels,
    /// Neither level lies inside the visible y range
    OutOfView,
}

#[derive(Debug, Clone, Copy)]
pub struct TriggerOverlayBuilder {
    points: usize,
}

impl Default for TriggerOverlayBuilder {
    fn default() -> Self {
        TriggerOverlayBuilder {
            points: OVERLAY_POINTS,
        }
    }
}

impl TriggerOverlayBuilder {
    /// Excite and relax levels for the current trigger source, if it has them.
    pub fn levels(params: &ParameterSet) -> Option<(f64, f64)> {
        let source = params.trigger_source()?;
        let excite = params.get(source.excite_field()?)?;
        let relax = params.get(source.relax_field()?)?;
        Some((excite, relax))
    }

    /// Build the overlay spanning `x_range`, culled against `y_range`.
    ///
    /// Without a known y range the levels are never considered out of view.
    pub fn build(
        &self,
        params: &ParameterSet,
        x_range: (f64, f64),
        y_range: Option<(f64, f64)>,
    ) -> Result<TriggerOverlay, Suppression> {
        if params.trigger_mode() == Some(TriggerMode::Continuous) {
            return Err(Suppression::Continuous);
        }
        let (excite, relax) = Self::levels(params).ok_or(Suppression::NoLevels)?;
        if let Some((ymin, ymax)) = y_range {
            let outside = |v: f64| v < ymin || v > ymax;
            if outside(excite) && outside(relax) {
                return Err(Suppression::OutOfView);
            }
        }

        Ok(TriggerOverlay {
            excite: self.flat(Marker::Plus, excite, x_range),
            relax: self.flat(Marker::Minus, relax, x_range),
        })
    }

    fn flat(&self, marker: Marker, level: f64, (xmin, xmax): (f64, f64)) -> OverlaySeries {
        let n = self.points.max(2);
        let dx = (xmax - xmin) / (n - 1) as f64;
        OverlaySeries {
            marker,
            level,
            points: (0..n).map(|i| (xmin + dx * i as f64, level)).collect(),
        }
    }
}
