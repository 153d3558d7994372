//! Render coordination.
//!
//! [`RenderCoordinator`] owns everything the plot shows: the latest sample
//! series, which channels are visible and the view window. A redraw turns
//! that state into a [`RenderFrame`] (decimated traces plus the trigger
//! overlay) and hands it to a [`PlotSurface`].
//!
//! ```text
//!  poll ──► replace_datasets ──┐
//!                              ▼
//!  local params ─────────► frame(width) ──► PlotSurface::draw
//!                          │        │
//!                     Decimator  TriggerOverlayBuilder
//! ```

use std::collections::BTreeSet;

use serde::Serialize;

use crate::decimate::Decimator;
use crate::params::{ParameterSet, TIME_UNITS};
use crate::range_step::{self, RangeControls, Step};
use crate::series::{merge_extent, ChannelId, Point, SampleSeries};
use crate::trigger::{Suppression, TriggerOverlay, TriggerOverlayBuilder};
use crate::view::{self, AxisRange, Direction, ViewWindow};

/// Something that can draw a frame, such as a chart widget or a terminal.
pub trait PlotSurface {
    /// Current drawable width in pixels.
    fn width_px(&self) -> usize;

    fn draw(&mut self, frame: &RenderFrame);
}

/// One decimated channel trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelTrace {
    pub channel: ChannelId,
    pub label: &'static str,
    pub color: &'static str,
    pub points: Vec<Point>,
    /// Sample count before decimation
    pub raw_len: usize,
}

/// Everything needed for one redraw.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderFrame {
    pub traces: Vec<ChannelTrace>,
    pub overlay: Option<TriggerOverlay>,
    pub suppressed: Option<Suppression>,
    pub x_range: Option<(f64, f64)>,
    pub y_range: Option<(f64, f64)>,
}

impl RenderFrame {
    pub fn point_count(&self) -> usize {
        self.traces.iter().map(|t| t.points.len()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct RenderCoordinator {
    datasets: Vec<SampleSeries>,
    visible: BTreeSet<ChannelId>,
    view: ViewWindow,
    decimator: Decimator,
    overlay: TriggerOverlayBuilder,
    initialised: bool,
}

impl RenderCoordinator {
    pub fn new(decimator: Decimator) -> Self {
        RenderCoordinator {
            datasets: Vec::new(),
            visible: ChannelId::ALL.into_iter().collect(),
            view: ViewWindow::default(),
            decimator,
            overlay: TriggerOverlayBuilder::default(),
            initialised: false,
        }
    }

    /// True once the first data set has been received and the view set up.
    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    /// First data: automatic x, y spanning `gui_reset_y_range` around zero.
    pub fn initialise(&mut self, y_span: f64) {
        self.view = ViewWindow::reset(y_span);
        self.initialised = true;
    }

    /// Drop data and view, as on an application restart.
    pub fn clear(&mut self) {
        self.datasets.clear();
        self.view = ViewWindow::default();
        self.visible = ChannelId::ALL.into_iter().collect();
        self.initialised = false;
    }

    /// Take ownership of a fresh poll result. Extra series are dropped.
    pub fn replace_datasets(&mut self, mut datasets: Vec<SampleSeries>) {
        datasets.truncate(ChannelId::ALL.len());
        self.datasets = datasets;
    }

    pub fn datasets(&self) -> &[SampleSeries] {
        &self.datasets
    }

    pub fn view(&self) -> &ViewWindow {
        &self.view
    }

    pub fn decimator(&self) -> &Decimator {
        &self.decimator
    }

    // =========================================================================
    // Channels
    // =========================================================================

    pub fn is_visible(&self, channel: ChannelId) -> bool {
        self.visible.contains(&channel)
    }

    pub fn visible_channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.visible.iter().copied()
    }

    /// Flip a channel's visibility, returning the new state.
    pub fn toggle_channel(&mut self, channel: ChannelId) -> bool {
        if self.visible.remove(&channel) {
            false
        } else {
            self.visible.insert(channel);
            true
        }
    }

    pub fn show_all_channels(&mut self) {
        self.visible.extend(ChannelId::ALL);
    }

    fn visible_series(&self) -> impl Iterator<Item = (ChannelId, &SampleSeries)> {
        self.visible
            .iter()
            .filter_map(|ch| self.datasets.get(ch.index()).map(|s| (*ch, s)))
    }

    // =========================================================================
    // View window
    // =========================================================================

    fn data_x_extent(&self) -> Option<(f64, f64)> {
        self.visible_series()
            .map(|(_, s)| s.x_extent())
            .fold(None, merge_extent)
    }

    fn data_y_extent(&self) -> Option<(f64, f64)> {
        self.visible_series()
            .map(|(_, s)| s.y_extent())
            .fold(None, merge_extent)
    }

    /// Effective x range: explicit bounds, else the data extent.
    pub fn visible_x(&self) -> Option<(f64, f64)> {
        self.view.x.resolve(self.data_x_extent())
    }

    /// Effective y range: explicit bounds, else the data extent.
    pub fn visible_y(&self) -> Option<(f64, f64)> {
        self.view.y.resolve(self.data_y_extent())
    }

    /// Explicit x window, if the operator or server fixed one.
    pub fn explicit_x(&self) -> Option<(f64, f64)> {
        self.view.x.explicit()
    }

    pub fn set_x(&mut self, min: f64, max: f64) {
        self.view.x = AxisRange::fixed(min, max);
    }

    pub fn set_y(&mut self, min: f64, max: f64) {
        self.view.y = AxisRange::fixed(min, max);
    }

    /// Back to automatic x and the reset y span, all channels on.
    pub fn reset_zoom(&mut self, y_span: f64) {
        self.show_all_channels();
        self.view = ViewWindow::reset(y_span);
    }

    /// Apply a server autoscale result and show every channel.
    pub fn apply_autoscale(&mut self, x: (f64, f64), y: (f64, f64)) {
        self.set_x(x.0, x.1);
        self.set_y(y.0, y.1);
        self.show_all_channels();
    }

    /// Zoom buttons for the current view.
    pub fn range_controls(&self, params: &ParameterSet) -> RangeControls {
        let time_units = params.get(TIME_UNITS).unwrap_or(0.0);
        RangeControls {
            x: self
                .visible_x()
                .and_then(|(lo, hi)| range_step::x_range_control(hi - lo, time_units)),
            y: self
                .visible_y()
                .and_then(|(lo, hi)| range_step::y_range_control(hi - lo)),
        }
    }

    /// Step the x span around its centre. Returns the new window.
    pub fn zoom_x(&mut self, params: &ParameterSet, step: Step) -> Option<(f64, f64)> {
        let current = self.visible_x()?;
        let span = self.range_controls(params).x?.axis_span(step)?;
        let (min, max) = range_step::recenter(current, span);
        self.set_x(min, max);
        Some((min, max))
    }

    /// Step the y span around its centre. Returns the new window.
    pub fn zoom_y(&mut self, params: &ParameterSet, step: Step) -> Option<(f64, f64)> {
        let current = self.visible_y()?;
        let span = self.range_controls(params).y?.axis_span(step)?;
        let (min, max) = range_step::recenter(current, span);
        self.set_y(min, max);
        Some((min, max))
    }

    /// Pan along x by `percent` of the visible span.
    pub fn offset_x(&mut self, percent: f64, direction: Direction) -> Option<(f64, f64)> {
        let (min, max) = view::shift(self.visible_x()?, percent, direction);
        self.set_x(min, max);
        Some((min, max))
    }

    /// Pan along y by `percent` of the visible span.
    pub fn offset_y(&mut self, percent: f64, direction: Direction) -> Option<(f64, f64)> {
        let (min, max) = view::shift(self.visible_y()?, percent, direction);
        self.set_y(min, max);
        Some((min, max))
    }

    /// Zoom to a box selection. Returns the clamped x window.
    pub fn select(&mut self, x: (f64, f64), y: (f64, f64)) -> (f64, f64) {
        let x = view::clamp_selection(x.0, x.1);
        let y = view::clamp_selection(y.0, y.1);
        self.set_x(x.0, x.1);
        self.set_y(y.0, y.1);
        x
    }

    /// Fit y to the visible data with a 10% margin.
    pub fn autoscale_y(&mut self) -> Option<(f64, f64)> {
        let (min, max) = view::padded_extent(self.data_y_extent()?)?;
        self.set_y(min, max);
        Some((min, max))
    }

    // =========================================================================
    // Frames
    // =========================================================================

    /// Build a frame for a plot `width_px` wide.
    pub fn frame(&self, params: &ParameterSet, width_px: usize) -> RenderFrame {
        let crop = self.explicit_x();
        let traces: Vec<ChannelTrace> = self
            .visible_series()
            .map(|(channel, series)| {
                let points = match crop {
                    Some((from, to)) => self.decimator.apply(series.window(from, to).points(), width_px),
                    None => self.decimator.apply(series.points(), width_px),
                };
                ChannelTrace {
                    channel,
                    label: channel.label(),
                    color: channel.color(),
                    points,
                    raw_len: series.len(),
                }
            })
            .collect();

        let overlay_x = crop
            .or_else(|| {
                traces
                    .first()
                    .and_then(|t| Some((t.points.first()?.0, t.points.last()?.0)))
            })
            .unwrap_or((0.0, 1.0));
        let y_range = self.visible_y();
        let (overlay, suppressed) = match self.overlay.build(params, overlay_x, y_range) {
            Ok(o) => (Some(o), None),
            Err(s) => (None, Some(s)),
        };

        RenderFrame {
            traces,
            overlay,
            suppressed,
            x_range: self.visible_x(),
            y_range,
        }
    }

    /// Build a frame sized for `surface` and draw it.
    pub fn render(&self, params: &ParameterSet, surface: &mut dyn PlotSurface) -> RenderFrame {
        let frame = self.frame(params, surface.width_px());
        surface.draw(&frame);
        frame
    }
}

impl Default for RenderCoordinator {
    fn default() -> Self {
        RenderCoordinator::new(Decimator::default())
    }
}
