//! Events broadcast to whatever presents the session to the operator.

use std::path::PathBuf;

use serde::Serialize;

use digdar_core::params::Adoption;
use digdar_core::{RangeControls, Readouts, SyncState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    /// The loop has stopped until the operator acts
    Fatal,
    /// Dismissible; polling resumes once the operator dismisses it
    NonFatal,
}

/// A message for the operator together with the choices offered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
    pub retry: bool,
    pub restart: bool,
    pub ignore: bool,
    /// Offer switching to the application the server runs
    pub switch_app: bool,
}

impl Notice {
    /// Stops the loop; offers retry and restart.
    pub fn fatal(message: impl Into<String>) -> Self {
        Notice {
            severity: Severity::Fatal,
            message: message.into(),
            retry: true,
            restart: true,
            ignore: false,
            switch_app: false,
        }
    }

    /// Dismissible; offers restart and ignore.
    pub fn non_fatal(message: impl Into<String>) -> Self {
        Notice {
            severity: Severity::NonFatal,
            message: message.into(),
            retry: false,
            restart: true,
            ignore: true,
            switch_app: false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut choices = Vec::new();
        if self.switch_app {
            choices.push("switch");
        }
        if self.retry {
            choices.push("retry");
        }
        if self.restart {
            choices.push("restart");
        }
        if self.ignore {
            choices.push("dismiss");
        }
        write!(f, "{} [{}]", self.message, choices.join(" / "))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SyncEvent {
    /// A server snapshot was applied
    ParamsAdopted { adoption: Adoption, dirty: bool },
    /// Continuous acquisition started or stopped
    RunState { running: bool },
    StateChanged(SyncState),
    Notice(Notice),
    NoticeCleared,
    /// The server runs a different application than the one we drive
    AppMismatch { reported: Option<String> },
    Readouts(Readouts),
    RangeControls(RangeControls),
    ParamsStored,
    ParamsLoaded { factory: bool },
    Exported(PathBuf),
    NamedSaved(String),
    NamedRecalled(String),
    NamedDeleted { name: String, existed: bool },
    /// Names of the stored parameter sets
    NamedSets(Vec<String>),
}
