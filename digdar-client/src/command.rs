//! Operator commands.
//!
//! Every control the operator has is a [`Command`] delivered to the
//! scheduler over a channel. The console front end parses text lines with
//! [`parse_line`]; other front ends can construct commands directly.
//!
//! ```text
//! set digdar_trig_excite 0.6     mode normal        zoom x in
//! excite 0.6                     source acp         offset y up
//! select 0 10 -0.5 0.5           channel heading    reset
//! save harbour                   recall harbour     sets
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use strum::{Display, EnumString};
use thiserror::Error;

use digdar_core::{ChannelId, Direction, ParameterSet, Step, TriggerMode, TriggerSource};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Poll once now
    Poll,
    /// Clear the current notice and poll
    Retry,
    /// Clear the current notice
    Dismiss,
    /// Restart the session from scratch
    Restart,
    /// Adopt the application the server reported and restart
    SwitchApp,
    /// The operator started editing a control; server values stop
    /// overwriting local ones
    BeginEdit,
    EndEdit,
    Set { key: String, value: f64 },
    SetTriggerMode(TriggerMode),
    SetTriggerSource(TriggerSource),
    SetExciteLevel(f64),
    SetRelaxLevel(f64),
    /// In samples
    SetTriggerDelay(f64),
    /// In samples
    SetLatency(f64),
    ToggleAverage,
    /// Ask the server to autoscale
    Autoscale,
    /// Fit y to the visible data locally
    AutoscaleY,
    ResetZoom,
    FitTimeRange,
    Single,
    ZoomX(Step),
    ZoomY(Step),
    OffsetX(Direction),
    OffsetY(Direction),
    /// Box selection in axis units
    Select { x: (f64, f64), y: (f64, f64) },
    /// Pan or pinch in progress, window in axis units
    Gesture { x: (f64, f64), y: (f64, f64) },
    ToggleChannel(ChannelId),
    Redraw,
    StoreParams,
    LoadParams,
    LoadFactoryParams,
    ImportParams(ParameterSet),
    ExportParams(PathBuf),
    /// Keep the local snapshot as a named set on disk
    SaveNamed(String),
    /// Apply a named set and push it
    RecallNamed(String),
    ListNamed,
    DeleteNamed(String),
    Shutdown,
}

impl Command {
    /// Commands that need a confirmed parameter snapshot and are ignored
    /// before the first server round trip.
    pub fn requires_params(&self) -> bool {
        matches!(
            self,
            Command::Set { .. }
                | Command::SetTriggerMode(_)
                | Command::SetTriggerSource(_)
                | Command::SetExciteLevel(_)
                | Command::SetRelaxLevel(_)
                | Command::SetTriggerDelay(_)
                | Command::SetLatency(_)
                | Command::ToggleAverage
                | Command::Autoscale
                | Command::AutoscaleY
                | Command::ResetZoom
                | Command::FitTimeRange
                | Command::Single
                | Command::ZoomX(_)
                | Command::ZoomY(_)
                | Command::OffsetX(_)
                | Command::OffsetY(_)
                | Command::Select { .. }
                | Command::Gesture { .. }
                | Command::StoreParams
                | Command::ImportParams(_)
                | Command::ExportParams(_)
                | Command::SaveNamed(_)
                | Command::RecallNamed(_)
        )
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("'{keyword}' expects {expected}")]
    Usage {
        keyword: Keyword,
        expected: &'static str,
    },
    #[error("'{0}' is not a number")]
    Number(String),
    #[error("import is handled by the console")]
    NeedsFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Keyword {
    Poll,
    Retry,
    Dismiss,
    Restart,
    Switch,
    Edit,
    Done,
    Set,
    Mode,
    Source,
    Excite,
    Relax,
    Delay,
    Latency,
    Avg,
    Auto,
    #[strum(serialize = "autoy")]
    AutoY,
    Reset,
    Fit,
    Single,
    Zoom,
    Offset,
    Select,
    Pan,
    Channel,
    Redraw,
    Store,
    Load,
    Factory,
    Import,
    Export,
    Save,
    Recall,
    Sets,
    Delete,
    #[strum(serialize = "quit", serialize = "exit")]
    Quit,
}

fn number(token: &str) -> Result<f64, CommandError> {
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CommandError::Number(token.to_string()))
}

fn trigger_mode(token: &str) -> Option<TriggerMode> {
    match token.to_ascii_lowercase().as_str() {
        "continuous" | "auto" => Some(TriggerMode::Continuous),
        "normal" => Some(TriggerMode::Normal),
        "single" => Some(TriggerMode::Single),
        other => TriggerMode::from_code(other.parse().ok()?),
    }
}

fn trigger_source(token: &str) -> Option<TriggerSource> {
    match token.to_ascii_lowercase().as_str() {
        "level" | "video" => Some(TriggerSource::Level),
        "external" | "ext" => Some(TriggerSource::External),
        "trigger" => Some(TriggerSource::Trigger),
        "acp" => Some(TriggerSource::Acp),
        "arp" => Some(TriggerSource::Arp),
        other => other.parse().ok().map(TriggerSource::from_code),
    }
}

fn channel(token: &str) -> Option<ChannelId> {
    match token.to_ascii_lowercase().as_str() {
        "video" => Some(ChannelId::Video),
        "trigger" => Some(ChannelId::Trigger),
        "azimuth" | "acp" => Some(ChannelId::Azimuth),
        "heading" | "arp" => Some(ChannelId::Heading),
        other => {
            let n: usize = other.parse().ok()?;
            ChannelId::from_index(n.checked_sub(1)?)
        }
    }
}

fn set_name(args: &[&str]) -> Option<String> {
    match args {
        [name] => Some(name.to_string()),
        _ => None,
    }
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Command>, CommandError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((first, args)) = tokens.split_first() else {
        return Ok(None);
    };
    let keyword =
        Keyword::from_str(first).map_err(|_| CommandError::Unknown(first.to_string()))?;
    let usage = |expected| CommandError::Usage { keyword, expected };

    let single_number = |args: &[&str]| -> Result<f64, CommandError> {
        match args {
            [value] => number(value),
            _ => Err(usage("one number")),
        }
    };

    let command = match keyword {
        Keyword::Poll => Command::Poll,
        Keyword::Retry => Command::Retry,
        Keyword::Dismiss => Command::Dismiss,
        Keyword::Restart => Command::Restart,
        Keyword::Switch => Command::SwitchApp,
        Keyword::Edit => Command::BeginEdit,
        Keyword::Done => Command::EndEdit,
        Keyword::Set => match args {
            [key, value] => Command::Set {
                key: key.to_string(),
                value: number(value)?,
            },
            _ => return Err(usage("<key> <value>")),
        },
        Keyword::Mode => match args {
            [m] => Command::SetTriggerMode(
                trigger_mode(m).ok_or_else(|| usage("continuous, normal or single"))?,
            ),
            _ => return Err(usage("continuous, normal or single")),
        },
        Keyword::Source => match args {
            [s] => Command::SetTriggerSource(
                trigger_source(s).ok_or_else(|| usage("level, external, trigger, acp or arp"))?,
            ),
            _ => return Err(usage("level, external, trigger, acp or arp")),
        },
        Keyword::Excite => Command::SetExciteLevel(single_number(args)?),
        Keyword::Relax => Command::SetRelaxLevel(single_number(args)?),
        Keyword::Delay => Command::SetTriggerDelay(single_number(args)?),
        Keyword::Latency => Command::SetLatency(single_number(args)?),
        Keyword::Avg => Command::ToggleAverage,
        Keyword::Auto => Command::Autoscale,
        Keyword::AutoY => Command::AutoscaleY,
        Keyword::Reset => Command::ResetZoom,
        Keyword::Fit => Command::FitTimeRange,
        Keyword::Single => Command::Single,
        Keyword::Zoom => {
            let step = |s: &str| match s {
                "in" => Some(Step::Prev),
                "out" => Some(Step::Next),
                _ => None,
            };
            match args {
                ["x", s] => Command::ZoomX(step(*s).ok_or_else(|| usage("x|y in|out"))?),
                ["y", s] => Command::ZoomY(step(*s).ok_or_else(|| usage("x|y in|out"))?),
                _ => return Err(usage("x|y in|out")),
            }
        }
        Keyword::Offset => match args {
            ["x", "left"] => Command::OffsetX(Direction::Backward),
            ["x", "right"] => Command::OffsetX(Direction::Forward),
            ["y", "down"] => Command::OffsetY(Direction::Backward),
            ["y", "up"] => Command::OffsetY(Direction::Forward),
            _ => return Err(usage("x left|right or y down|up")),
        },
        Keyword::Select | Keyword::Pan => match args {
            [x0, x1, y0, y1] => {
                let x = (number(x0)?, number(x1)?);
                let y = (number(y0)?, number(y1)?);
                if keyword == Keyword::Select {
                    Command::Select { x, y }
                } else {
                    Command::Gesture { x, y }
                }
            }
            _ => return Err(usage("<xmin> <xmax> <ymin> <ymax>")),
        },
        Keyword::Channel => match args {
            [c] => Command::ToggleChannel(
                channel(c).ok_or_else(|| usage("video, trigger, azimuth, heading or 1-4"))?,
            ),
            _ => return Err(usage("video, trigger, azimuth, heading or 1-4")),
        },
        Keyword::Redraw => Command::Redraw,
        Keyword::Store => Command::StoreParams,
        Keyword::Load => Command::LoadParams,
        Keyword::Factory => Command::LoadFactoryParams,
        Keyword::Import => return Err(CommandError::NeedsFile),
        Keyword::Export => match args {
            [path] => Command::ExportParams(PathBuf::from(path)),
            _ => return Err(usage("<file>")),
        },
        Keyword::Save => Command::SaveNamed(set_name(args).ok_or_else(|| usage("<name>"))?),
        Keyword::Recall => Command::RecallNamed(set_name(args).ok_or_else(|| usage("<name>"))?),
        Keyword::Sets => Command::ListNamed,
        Keyword::Delete => Command::DeleteNamed(set_name(args).ok_or_else(|| usage("<name>"))?),
        Keyword::Quit => Command::Shutdown,
    };
    Ok(Some(command))
}
