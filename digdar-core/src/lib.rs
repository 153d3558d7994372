//! # Digdar Core
//!
//! Platform-independent parameter synchronisation and waveform pipeline for
//! the Digdar radar digitiser client.
//!
//! This crate contains pure logic with **zero I/O dependencies**: no sockets,
//! no timers, no async runtime. Time and network results are fed in by the
//! caller, which keeps every rule here testable with plain unit tests.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  digdar-core (platform-independent, no tokio/async deps)    │
//! │  ├── params/      (confirmed vs local snapshots, dirty set) │
//! │  ├── protocol/    (wire types, response classification)     │
//! │  ├── sync/        (single-flight push, poll retry, timeouts)│
//! │  ├── decimate/    (stride decimation for display)           │
//! │  ├── range_step/  (nice-number zoom steps, range controls)  │
//! │  ├── trigger/     (trigger level overlay)                   │
//! │  ├── view/        (visible window, pan, selection)          │
//! │  ├── render/      (RenderCoordinator, PlotSurface)          │
//! │  └── readout/     (measurement panel formatting)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                 ┌────────────┴────────────┐
//!                 │  digdar-client          │
//!                 │  (tokio, reqwest, CLI)  │
//!                 └─────────────────────────┘
//! ```
//!
//! ## Example: Tracking Edits
//!
//! ```rust
//! use digdar_core::{ParamStore, ParameterSet};
//!
//! let mut store = ParamStore::new();
//! store.adopt(
//!     ParameterSet::from_pairs(&[("trig_mode", 1.0), ("digdar_trig_excite", 0.5)]),
//!     false,
//! );
//! store.set("digdar_trig_excite", 0.6);
//! assert!(store.is_dirty());
//! ```

pub mod decimate;
pub mod error;
pub mod params;
pub mod protocol;
pub mod range_step;
pub mod readout;
pub mod render;
pub mod series;
pub mod sync;
pub mod trigger;
pub mod view;

pub use decimate::Decimator;
pub use error::ProtocolError;
pub use params::{ParamStore, ParameterSet, TriggerMode, TriggerSource};
pub use protocol::{DataResponse, PollOutcome, PushOutcome};
pub use range_step::{nearest_steps, RangeControls, RangeStep, Step};
pub use readout::Readouts;
pub use render::{PlotSurface, RenderCoordinator, RenderFrame};
pub use series::{ChannelId, Point, SampleSeries};
pub use sync::{SyncMachine, SyncState};
pub use trigger::{Suppression, TriggerOverlay, TriggerOverlayBuilder};
pub use view::{Direction, ViewWindow};
