//! Measurement panel values.

use serde::Serialize;

use crate::params::ParameterSet;

/// Shown when a value is zero or unavailable.
pub const PLACEHOLDER: &str = "---.-";

/// Fix to four significant digits regardless of where the point falls.
fn four_digits(value: f64) -> String {
    const EPS: f64 = 1e-2;
    let decimals = if value >= 100.0 - EPS {
        1
    } else if value >= 10.0 - EPS {
        2
    } else {
        3
    };
    let text = format!("{:.*}", decimals, value);
    if text.parse::<f64>().map(|v| v == 0.0).unwrap_or(false) {
        PLACEHOLDER.to_string()
    } else {
        text
    }
}

/// Frequency with an Hz, kHz or MHz suffix.
pub fn convert_hz(value: f64) -> String {
    if !value.is_finite() {
        return format!("{} Hz", PLACEHOLDER);
    }
    let (scaled, unit) = if value >= 1e6 {
        (value / 1e6, "MHz")
    } else if value >= 1e3 {
        (value / 1e3, "kHz")
    } else {
        (value, "Hz")
    };
    format!("{} {}", four_digits(scaled), unit)
}

/// Duration with an ns, μs, ms or s suffix.
pub fn convert_sec(value: f64) -> String {
    if !value.is_finite() {
        return format!("{} s", PLACEHOLDER);
    }
    let (scaled, unit) = if value < 1e-6 {
        (value * 1e9, "ns")
    } else if value < 1e-3 {
        (value * 1e6, "μs")
    } else if value < 1.0 {
        (value * 1e3, "ms")
    } else {
        (value, "s")
    };
    format!("{} {}", four_digits(scaled), unit)
}

/// One decimal from 10 up, three below.
pub fn shorten_float(value: f64) -> String {
    if value.abs() >= 10.0 {
        format!("{:.1}", value)
    } else {
        format!("{:.3}", value)
    }
}

/// Statistics for one analog channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelReadout {
    pub min: String,
    pub max: String,
    pub amplitude: String,
    pub average: String,
    pub frequency: String,
    pub period: String,
}

impl ChannelReadout {
    /// Read the `meas_*_ch{n}` group.
    fn from_params(params: &ParameterSet, n: u8) -> Self {
        let value = |name: &str| params.get(&format!("meas_{}_ch{}", name, n));
        let short = |v: Option<f64>| v.map(shorten_float).unwrap_or_else(|| PLACEHOLDER.into());
        ChannelReadout {
            min: short(value("min")),
            max: short(value("max")),
            amplitude: short(value("amp")),
            average: short(value("avg")),
            frequency: convert_hz(value("freq").unwrap_or(0.0)),
            period: convert_sec(value("per").unwrap_or(0.0)),
        }
    }
}

/// Radar timing counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarReadout {
    pub trigger_rate: String,
    pub capture_rate: String,
    pub trigger_period: String,
    pub acp_rate: String,
    pub acps_per_arp: Option<u32>,
    /// ARP rate in Hz, one decimal
    pub arp_rate: Option<f64>,
    /// Antenna position within the current sweep, 0..1
    pub sweep_fraction: Option<f64>,
}

impl RadarReadout {
    fn from_params(params: &ParameterSet) -> Self {
        let trig_rate = params.get("digdar_trig_rate").unwrap_or(0.0);
        let acps_per_arp = params
            .get("digdar_acps_per_arp")
            .filter(|v| *v >= 1.0)
            .map(|v| v.round() as u32);
        let sweep_fraction = acps_per_arp.and_then(|per| {
            let seen = params.get("digdar_acps_seen")?;
            Some((seen.rem_euclid(per as f64)) / per as f64)
        });
        RadarReadout {
            trigger_rate: convert_hz(trig_rate),
            capture_rate: convert_hz(params.get("digdar_capture_rate").unwrap_or(0.0)),
            trigger_period: convert_sec(1.0 / trig_rate),
            acp_rate: convert_hz(params.get("digdar_acp_rate").unwrap_or(0.0)),
            acps_per_arp,
            arp_rate: params
                .get("digdar_arps_rate")
                .map(|v| (v * 10.0).round() / 10.0),
            sweep_fraction,
        }
    }
}

/// Everything on the measurement panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Readouts {
    pub video: ChannelReadout,
    pub trigger: ChannelReadout,
    pub radar: RadarReadout,
}

impl Readouts {
    pub fn from_params(params: &ParameterSet) -> Self {
        Readouts {
            video: ChannelReadout::from_params(params, 1),
            trigger: ChannelReadout::from_params(params, 2),
            radar: RadarReadout::from_params(params),
        }
    }
}
