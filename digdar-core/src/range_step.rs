//! "Nice number" zoom steps and the axis range controls built on them.
//!
//! Zoom buttons move an axis span to the neighbouring value of
//! `{0.5, 1, 2, 5, 10, 20, 50, 100} × 10^k`. A span that is already within
//! 1% of a table value steps past it instead of landing on it again.

use serde::Serialize;

/// Step table, one decade plus the neighbours needed for bracketing.
pub const RANGE_STEPS: [f64; 8] = [0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0];

/// Relative tolerance within which a span counts as sitting on a step.
const SNAP_TOLERANCE: f64 = 0.01;

/// Longest x span reachable with the zoom buttons, in seconds.
pub const X_MAX_SPAN_SECONDS: f64 = 10.0;
/// Shortest x span reachable with the zoom buttons, in seconds.
pub const X_MIN_SPAN_SECONDS: f64 = 20e-9;
/// Largest y span in volts.
pub const Y_MAX_SPAN: f64 = 2.0;
/// Smallest y span in volts.
pub const Y_MIN_SPAN: f64 = 1e-4;

/// Nearest smaller and larger nice values around a span.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RangeStep {
    pub prev: f64,
    pub next: f64,
}

/// Nice values bracketing `m`. `None` for non-positive or non-finite input.
pub fn nearest_steps(m: f64) -> Option<RangeStep> {
    if !(m.is_finite() && m > 0.0) {
        return None;
    }
    let exponent = m.log10().floor();
    let scale = 10f64.powf(exponent);
    let normalized = m / scale;

    for i in 0..RANGE_STEPS.len() - 1 {
        let ratio = RANGE_STEPS[i + 1] / normalized;
        if ratio > 1.0 - SNAP_TOLERANCE && ratio < 1.0 + SNAP_TOLERANCE {
            let next = RANGE_STEPS.get(i + 2)?;
            return Some(RangeStep {
                prev: RANGE_STEPS[i] * scale,
                next: next * scale,
            });
        }
        if RANGE_STEPS[i] < normalized && normalized < RANGE_STEPS[i + 1] {
            return Some(RangeStep {
                prev: RANGE_STEPS[i] * scale,
                next: RANGE_STEPS[i + 1] * scale,
            });
        }
    }
    None
}

// =============================================================================
// Axis units
// =============================================================================

/// Time unit of the x axis as reported in `time_units`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl TimeUnit {
    /// Axis unit for a `time_units` code: 0 is μs, 1 is ms, anything else s.
    pub fn from_code(code: f64) -> TimeUnit {
        match code.round() as i64 {
            0 => TimeUnit::Microseconds,
            1 => TimeUnit::Milliseconds,
            _ => TimeUnit::Seconds,
        }
    }

    pub fn seconds(self) -> f64 {
        match self {
            TimeUnit::Nanoseconds => 1e-9,
            TimeUnit::Microseconds => 1e-6,
            TimeUnit::Milliseconds => 1e-3,
            TimeUnit::Seconds => 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "μs",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
        }
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// =============================================================================
// Range controls
// =============================================================================

/// Zoom direction for an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Step {
    /// Smaller span (zoom in)
    Prev,
    /// Larger span (zoom out)
    Next,
}

/// State of one axis' zoom buttons.
///
/// `span`, `prev` and `next` are in the display unit; a disabled button has
/// no target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisRangeControl {
    pub span: f64,
    pub unit: &'static str,
    pub label: String,
    pub prev: Option<f64>,
    pub next: Option<f64>,
    /// Multiplier from display unit back to axis unit.
    #[serde(skip)]
    axis_factor: f64,
}

impl AxisRangeControl {
    /// Target span in axis units for a zoom step, if that button is enabled.
    pub fn axis_span(&self, step: Step) -> Option<f64> {
        let target = match step {
            Step::Prev => self.prev,
            Step::Next => self.next,
        }?;
        Some(target * self.axis_factor)
    }
}

/// Zoom button state for both axes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RangeControls {
    pub x: Option<AxisRangeControl>,
    pub y: Option<AxisRangeControl>,
}

/// X zoom controls for a visible span given in the `time_units` axis unit.
pub fn x_range_control(span: f64, time_units: f64) -> Option<AxisRangeControl> {
    if !(span.is_finite() && span > 0.0) {
        return None;
    }
    let mut unit = TimeUnit::from_code(time_units);
    let mut display = span;
    let mut axis_factor = 1.0;
    if unit == TimeUnit::Microseconds && display < 1.0 {
        display *= 1000.0;
        unit = TimeUnit::Nanoseconds;
        axis_factor = 1e-3;
    }
    let decimals = if display < 1.0 { 1 } else { 0 };
    let steps = nearest_steps(display)?;
    let seconds = unit.seconds();

    Some(AxisRangeControl {
        span: display,
        unit: unit.label(),
        label: format!("{} {}", round_to(display, decimals), unit.label()),
        prev: Some(steps.prev).filter(|p| p * seconds >= X_MIN_SPAN_SECONDS),
        next: Some(steps.next).filter(|n| n * seconds <= X_MAX_SPAN_SECONDS),
        axis_factor,
    })
}

/// Y zoom controls for a visible span in volts.
pub fn y_range_control(span: f64) -> Option<AxisRangeControl> {
    if !(span.is_finite() && span > 0.0) {
        return None;
    }
    let (display, unit, factor) = if span < 1.0 {
        (span * 1000.0, "mV", 1000.0)
    } else {
        (span, "V", 1.0)
    };
    let max_span = Y_MAX_SPAN * factor;
    let min_span = Y_MIN_SPAN * factor;
    let steps = nearest_steps(display)?;

    Some(AxisRangeControl {
        span: display,
        unit,
        label: format!("{} {}", display.floor(), unit),
        prev: Some(steps.prev).filter(|p| *p >= min_span),
        next: Some(steps.next).filter(|_| steps.next - steps.prev < max_span),
        axis_factor: 1.0 / factor,
    })
}

/// Recentre `(min, max)` on its midpoint with a new span.
pub fn recenter(range: (f64, f64), span: f64) -> (f64, f64) {
    let center = (range.0 + range.1) / 2.0;
    (center - span / 2.0, center + span / 2.0)
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
