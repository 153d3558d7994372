//! Channels and sample series.
//!
//! The instrument always reports up to four channels in a fixed order.
//! A poll replaces every series wholesale; nothing here is mutated after
//! it has been received.

use serde::{Deserialize, Serialize};

/// One `(x, y)` sample. On the wire this is a two element array.
pub type Point = (f64, f64);

/// Instrument channel, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    /// Raw radar video
    Video,
    /// Trigger pulse
    Trigger,
    /// Azimuth count pulse (ACP)
    Azimuth,
    /// Heading marker (ARP)
    Heading,
}

impl ChannelId {
    pub const ALL: [ChannelId; 4] = [
        ChannelId::Video,
        ChannelId::Trigger,
        ChannelId::Azimuth,
        ChannelId::Heading,
    ];

    /// Position of this channel in the `g1` dataset array.
    pub fn index(self) -> usize {
        match self {
            ChannelId::Video => 0,
            ChannelId::Trigger => 1,
            ChannelId::Azimuth => 2,
            ChannelId::Heading => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<ChannelId> {
        ChannelId::ALL.get(index).copied()
    }

    /// Legend label
    pub fn label(self) -> &'static str {
        match self {
            ChannelId::Video => "Video",
            ChannelId::Trigger => "Trigger",
            ChannelId::Azimuth => "Azimuth / ACP",
            ChannelId::Heading => "Heading / ARP",
        }
    }

    /// Trace color as a CSS hex string
    pub fn color(self) -> &'static str {
        match self {
            ChannelId::Video => "#D22D2D",
            ChannelId::Trigger => "#10ff10",
            ChannelId::Azimuth => "#0000ff",
            ChannelId::Heading => "#101010",
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Ordered samples for one channel, as received from the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleSeries {
    points: Vec<Point>,
}

impl SampleSeries {
    pub fn new(points: Vec<Point>) -> Self {
        SampleSeries { points }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// X of the first and last sample. Samples arrive sorted by x.
    pub fn x_extent(&self) -> Option<(f64, f64)> {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => Some((first.0, last.0)),
            _ => None,
        }
    }

    /// Smallest and largest y over all samples.
    pub fn y_extent(&self) -> Option<(f64, f64)> {
        self.points.iter().fold(None, |acc, &(_, y)| match acc {
            None => Some((y, y)),
            Some((lo, hi)) => Some((lo.min(y), hi.max(y))),
        })
    }

    /// Samples with `from <= x <= to`.
    pub fn window(&self, from: f64, to: f64) -> SampleSeries {
        let points = self
            .points
            .iter()
            .copied()
            .take_while(|p| p.0 <= to)
            .filter(|p| p.0 >= from)
            .collect();
        SampleSeries { points }
    }
}

impl From<Vec<Point>> for SampleSeries {
    fn from(points: Vec<Point>) -> Self {
        SampleSeries::new(points)
    }
}

/// Union of two optional `(min, max)` extents.
pub(crate) fn merge_extent(a: Option<(f64, f64)>, b: Option<(f64, f64)>) -> Option<(f64, f64)> {
    match (a, b) {
        (Some((a0, a1)), Some((b0, b1))) => Some((a0.min(b0), a1.max(b1))),
        (Some(e), None) | (None, Some(e)) => Some(e),
        (None, None) => None,
    }
}
