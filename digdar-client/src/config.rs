//! Client configuration.
//!
//! Timing constants default to what the instrument web client has always
//! used; the CLI can override the ones that matter in the field.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;

use digdar_core::decimate::DEFAULT_POINTS_PER_PX;
use digdar_core::sync::{LONG_TIMEOUT_MS, REQUEST_TIMEOUT_MS};
use digdar_core::view::DEFAULT_OFFSET_PERCENT;

use crate::{Cli, FormFactor};

pub const DEFAULT_APP_ID: &str = "digdar";
pub const DEFAULT_ROOT_URL: &str = "http://127.0.0.1";

/// Project directories for stored parameter files.
pub fn get_project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "digdar", "digdar-client")
}

/// Where named parameter files live by default.
pub fn default_params_dir() -> PathBuf {
    get_project_dirs()
        .map(|dirs| dirs.data_dir().join("params"))
        .unwrap_or_else(|| PathBuf::from("./params"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Server root, without trailing slash
    pub root_url: String,
    /// Application this client drives
    pub app_id: String,
    /// Delay between polls while running
    pub update_interval: Duration,
    pub request_timeout: Duration,
    /// Timeout around a server side autoscale
    pub long_timeout: Duration,
    /// Delay before a coalesced push is replayed
    pub replay_delay: Duration,
    /// Quiet time after the last pan/zoom gesture before it is pushed
    pub settle_delay: Duration,
    /// Emit measurement readouts on every n-th adoption
    pub meas_panel_dec: u32,
    /// `None` disables decimation
    pub points_per_px: Option<usize>,
    /// Pan step as a percentage of the visible span
    pub offset_percent: f64,
    /// Decimal places kept for pushed `xmin`/`xmax`
    pub x_decimals: i32,
    /// Fixed plot width; `None` follows the terminal
    pub plot_width: Option<usize>,
    /// Directory holding named parameter sets
    pub params_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_form_factor(FormFactor::Desktop)
    }
}

impl ClientConfig {
    pub fn for_form_factor(form_factor: FormFactor) -> Self {
        let (update_interval, meas_panel_dec) = match form_factor {
            FormFactor::Desktop => (Duration::from_millis(50), 5),
            FormFactor::Touch => (Duration::from_millis(500), 1),
        };
        ClientConfig {
            root_url: DEFAULT_ROOT_URL.to_string(),
            app_id: DEFAULT_APP_ID.to_string(),
            update_interval,
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
            long_timeout: Duration::from_millis(LONG_TIMEOUT_MS),
            replay_delay: Duration::from_millis(100),
            settle_delay: Duration::from_millis(250),
            meas_panel_dec,
            points_per_px: Some(DEFAULT_POINTS_PER_PX),
            offset_percent: DEFAULT_OFFSET_PERCENT,
            x_decimals: 2,
            plot_width: None,
            params_dir: default_params_dir(),
        }
    }

    pub fn from_cli(args: &Cli) -> Self {
        let mut config = Self::for_form_factor(args.form_factor);
        config.root_url = args.url.trim_end_matches('/').to_string();
        config.app_id = args.app_id.clone();
        config.points_per_px = if args.unlimited_points {
            None
        } else {
            Some(args.points_per_px)
        };
        config.plot_width = args.width;
        if let Some(dir) = &args.params_dir {
            config.params_dir = dir.clone();
        }
        if let Some(ms) = args.interval_ms {
            config.update_interval = Duration::from_millis(ms);
        }
        config
    }
}
