//! # Digdar Client
//!
//! Control and telemetry client for the Digdar radar digitiser.
//!
//! The client keeps the operator's view of the acquisition parameters in
//! step with the instrument: it polls the server for fresh waveforms and
//! parameters, pushes local edits back, and renders the result onto a plot
//! surface.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      digdar-client                        │
//! │  ┌─────────────┐   Command    ┌────────────────────────┐  │
//! │  │  Console    │ ───────────► │  SyncScheduler         │  │
//! │  │  (stdin)    │ ◄─────────── │  - poll / push loop    │  │
//! │  └─────────────┘  SyncEvent   │  - timers, notices     │  │
//! │                               └───────────┬────────────┘  │
//! │                                           │               │
//! │                      ┌────────────────────┼──────────┐    │
//! │                      ▼                    ▼          ▼    │
//! │              HttpTransport        TerminalSurface  files  │
//! │              (reqwest)            (PlotSurface)   (serde) │
//! └───────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                   digdar-core (pure logic)
//! ```
//!
//! ## Key Components
//!
//! - [`scheduler::SyncScheduler`] - owns the session and drives the loop
//! - [`transport::HttpTransport`] - the instrument's HTTP API
//! - [`console::Console`] - operator commands on stdin
//! - [`storage`] - parameter files and named parameter sets on disk
//!
//! ## Example: Running the Client
//!
//! ```rust,no_run
//! use clap::Parser;
//! use digdar_client::config::ClientConfig;
//! use digdar_client::scheduler::SyncScheduler;
//! use digdar_client::surface::TerminalSurface;
//! use digdar_client::transport::HttpTransport;
//! use digdar_client::Cli;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//! use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};
//!
//! #[tokio::main]
//! async fn main() {
//!     let args = Cli::parse_from(["digdar-client", "-u", "http://10.0.1.221"]);
//!     let config = ClientConfig::from_cli(&args);
//!     let transport =
//!         Arc::new(HttpTransport::new(&config.root_url, config.request_timeout).unwrap());
//!     let surface = Box::new(TerminalSurface::new(config.plot_width));
//!     let scheduler = SyncScheduler::new(transport, config, surface);
//!     let (_tx, rx) = mpsc::channel(32);
//!
//!     Toplevel::new(|s| async move {
//!         s.start(SubsystemBuilder::new("Scheduler", |subsys| scheduler.run(rx, subsys)));
//!     })
//!     .catch_signals()
//!     .handle_shutdown_requests(Duration::from_secs(5))
//!     .await
//!     .unwrap();
//! }
//! ```
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] for all available options. Key options:
//!
//! - `-u, --url` - Instrument address (default: http://127.0.0.1)
//! - `-f, --form-factor` - `desktop` or `touch` poll cadence
//! - `-v` - Increase verbosity (use multiple times)
//! - `--single` - Take one acquisition after start
//! - `--import` / `--export` - Parameter files applied or written at start
//! - `--params-dir` - Where `save` / `recall` keep named parameter sets

use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;

use digdar_core::decimate::DEFAULT_POINTS_PER_PX;

pub mod command;
pub mod config;
pub mod console;
pub mod event;
pub mod scheduler;
pub mod storage;
pub mod surface;
pub mod transport;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] transport::TransportError),
    #[error(transparent)]
    Storage(#[from] storage::StorageError),
}

/// Poll cadence and readout rate presets.
#[derive(clap::ValueEnum, Clone, Copy, Default, Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormFactor {
    #[default]
    Desktop,
    /// Slower polling, readouts on every update
    Touch,
}

#[derive(Parser, Clone, Debug)]
#[command(version, about)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Instrument root URL
    #[arg(short, long, default_value = config::DEFAULT_ROOT_URL)]
    pub url: String,

    /// Application to drive on the instrument
    #[arg(short, long, default_value = config::DEFAULT_APP_ID)]
    pub app_id: String,

    /// Poll cadence preset
    #[arg(short, long, default_value_t, value_enum)]
    pub form_factor: FormFactor,

    /// Points kept per horizontal pixel when decimating
    #[arg(long, default_value_t = DEFAULT_POINTS_PER_PX)]
    pub points_per_px: usize,

    /// Draw every sample
    #[arg(long, default_value_t = false)]
    pub unlimited_points: bool,

    /// Plot width in pixels, default follows the terminal
    #[arg(short, long)]
    pub width: Option<usize>,

    /// Override the poll interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Request one acquisition once parameters are known
    #[arg(long, default_value_t = false)]
    pub single: bool,

    /// Parameter file to apply once parameters are known
    #[arg(long)]
    pub import: Option<PathBuf>,

    /// Write the parameters to this file once they are known
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Directory for named parameter sets (`save` / `recall`)
    #[arg(long)]
    pub params_dir: Option<PathBuf>,

    /// Do not read commands from stdin
    #[arg(long, default_value_t = false)]
    pub no_console: bool,
}
