//! Terminal plot surface.
//!
//! Draws nothing graphical: each frame is summarised as one log line per
//! trace, and the width follows the terminal so decimation still matches
//! what a chart of that size would show.

use terminal_size::{terminal_size, Width};

use digdar_core::{PlotSurface, RenderFrame};

/// Pixels assumed per terminal column.
const PX_PER_COLUMN: usize = 8;
/// Width used when there is no terminal to measure.
pub const DEFAULT_WIDTH_PX: usize = 640;

pub struct TerminalSurface {
    fixed_width: Option<usize>,
    frames: u64,
}

impl TerminalSurface {
    pub fn new(fixed_width: Option<usize>) -> Self {
        TerminalSurface {
            fixed_width,
            frames: 0,
        }
    }

    /// Frames drawn so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl PlotSurface for TerminalSurface {
    fn width_px(&self) -> usize {
        if let Some(width) = self.fixed_width {
            return width;
        }
        match terminal_size() {
            Some((Width(columns), _)) => columns as usize * PX_PER_COLUMN,
            None => DEFAULT_WIDTH_PX,
        }
    }

    fn draw(&mut self, frame: &RenderFrame) {
        self.frames += 1;
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        log::debug!(
            "frame {}: x {:?} y {:?}, {} points",
            self.frames,
            frame.x_range,
            frame.y_range,
            frame.point_count()
        );
        for trace in &frame.traces {
            log::debug!(
                "  {:<16} {:>6} of {:>6} points",
                trace.label,
                trace.points.len(),
                trace.raw_len
            );
        }
        match (&frame.overlay, frame.suppressed) {
            (Some(overlay), _) => log::debug!(
                "  trigger overlay: excite {} relax {}",
                overlay.excite.level,
                overlay.relax.level
            ),
            (None, Some(reason)) => log::trace!("  trigger overlay suppressed: {:?}", reason),
            (None, None) => {}
        }
    }
}
