//! Wire format of the instrument server.
//!
//! Every endpoint answers with JSON. Poll and push responses share one
//! shape:
//!
//! ```json
//! {
//!   "status": "OK" | "ERROR" | "AGAIN",
//!   "app": { "id": "digdar" },
//!   "datasets": { "params": { ... }, "g1": [ [[x, y], ...], ... ] },
//!   "reason": "optional text"
//! }
//! ```
//!
//! This module only decodes and classifies; what to do with an outcome is
//! up to the caller.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::params::{ParameterSet, FORCEX_FLAG, MAX_Y, MIN_Y};
use crate::series::{Point, SampleSeries};

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Ok,
    Error,
    /// Data is not ready yet, poll again
    Again,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AppInfo {
    #[serde(default)]
    pub id: Option<String>,
}

/// A channel is either a bare point list or an object with a `data` list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum WireSeries {
    Points(Vec<Point>),
    Object { data: Vec<Point> },
}

impl From<WireSeries> for SampleSeries {
    fn from(w: WireSeries) -> Self {
        match w {
            WireSeries::Points(points) | WireSeries::Object { data: points } => {
                SampleSeries::new(points)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Datasets {
    #[serde(default)]
    pub params: Option<ParameterSet>,
    #[serde(default, deserialize_with = "deserialize_series")]
    pub g1: Vec<SampleSeries>,
}

fn deserialize_series<'de, D>(deserializer: D) -> Result<Vec<SampleSeries>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let wire = Option::<Vec<WireSeries>>::deserialize(deserializer)?;
    Ok(wire
        .unwrap_or_default()
        .into_iter()
        .map(SampleSeries::from)
        .collect())
}

/// Decoded poll or push response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DataResponse {
    #[serde(default)]
    pub status: Option<ResponseStatus>,
    #[serde(default)]
    pub app: Option<AppInfo>,
    #[serde(default)]
    pub datasets: Option<Datasets>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl DataResponse {
    pub fn from_slice(body: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn is_error(&self) -> bool {
        self.status == Some(ResponseStatus::Error)
    }

    pub fn app_id(&self) -> Option<&str> {
        self.app.as_ref().and_then(|a| a.id.as_deref())
    }
}

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Serialize)]
struct PushDatasets<'a> {
    params: &'a ParameterSet,
}

/// Body of a push: `{"datasets": {"params": {...}}}`.
#[derive(Debug, Serialize)]
pub struct PushRequest<'a> {
    datasets: PushDatasets<'a>,
}

impl<'a> PushRequest<'a> {
    pub fn new(params: &'a ParameterSet) -> Self {
        PushRequest {
            datasets: PushDatasets { params },
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Decode a stored parameter document. The server may return the object
/// itself or a JSON string that contains it.
pub fn parse_param_document(body: &str) -> Result<ParameterSet, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(body.trim())?;
    let value = match value {
        serde_json::Value::String(inner) => serde_json::from_str(&inner)?,
        other => other,
    };
    if !value.is_object() {
        return Err(ProtocolError::InvalidParams(format!(
            "expected a JSON object, got {}",
            value
        )));
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidParams(e.to_string()))
}

// =============================================================================
// Classification
// =============================================================================

/// Server forced x window, present when `forcex_flag` is 1.
fn forced_x(params: &ParameterSet) -> Option<(f64, f64)> {
    if params.flag(FORCEX_FLAG) {
        params.x_window()
    } else {
        None
    }
}

/// Successful poll payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PollData {
    pub params: ParameterSet,
    pub series: Vec<SampleSeries>,
    /// Server asked to be polled again regardless of run mode
    pub again: bool,
    pub force_x: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// `status: ERROR`
    ServerError { reason: Option<String> },
    /// A different application is running on the server
    AppMismatch { reported: Option<String> },
    Data(PollData),
    /// Neither an error nor a usable payload
    Malformed,
}

/// Classify a poll response against the application this client drives.
pub fn classify_poll(response: DataResponse, expected_app: &str) -> PollOutcome {
    if response.is_error() {
        return PollOutcome::ServerError {
            reason: response.reason,
        };
    }
    let again = response.status == Some(ResponseStatus::Again);
    let reported = response.app_id().map(str::to_owned);
    let Some(Datasets {
        params: Some(params),
        g1,
    }) = response.datasets
    else {
        return PollOutcome::Malformed;
    };
    if reported.as_deref() != Some(expected_app) {
        return PollOutcome::AppMismatch { reported };
    }
    PollOutcome::Data(PollData {
        force_x: forced_x(&params),
        params,
        series: g1,
        again,
    })
}

/// Window returned by a server side autoscale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoscaleWindow {
    pub x: (f64, f64),
    pub y: (f64, f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushData {
    pub params: ParameterSet,
    /// Only when the push requested an autoscale and the server produced one
    pub autoscale: Option<AutoscaleWindow>,
    /// Only when the push did not request an autoscale
    pub force_x: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Accepted(PushData),
    ServerError { reason: Option<String> },
    /// No parameters and no error status
    Unexpected,
}

/// Classify a push response. `auto_requested` is whether the pushed
/// snapshot carried `auto_flag`.
pub fn classify_push(response: DataResponse, auto_requested: bool) -> PushOutcome {
    let is_error = response.is_error();
    match response.datasets.and_then(|d| d.params) {
        Some(params) => {
            let autoscale = if auto_requested {
                autoscale_window(&params)
            } else {
                None
            };
            let force_x = if auto_requested {
                None
            } else {
                forced_x(&params)
            };
            PushOutcome::Accepted(PushData {
                params,
                autoscale,
                force_x,
            })
        }
        None if is_error => PushOutcome::ServerError {
            reason: response.reason,
        },
        None => PushOutcome::Unexpected,
    }
}

fn autoscale_window(params: &ParameterSet) -> Option<AutoscaleWindow> {
    let (ymin, ymax) = (params.get(MIN_Y)?, params.get(MAX_Y)?);
    if ymin == ymax {
        return None;
    }
    Some(AutoscaleWindow {
        x: params.x_window()?,
        y: (ymin, ymax),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(s: &str) -> DataResponse {
        DataResponse::from_slice(s.as_bytes()).unwrap()
    }

    #[test]
    fn test_poll_data_with_both_series_shapes() {
        let r = decode(
            r#"{"status":"OK","app":{"id":"digdar"},
                "datasets":{"params":{"trig_mode":1},
                            "g1":[[[0,1],[1,2]], {"data":[[0,3]],"label":"x"}]}}"#,
        );
        match classify_poll(r, "digdar") {
            PollOutcome::Data(d) => {
                assert_eq!(d.series.len(), 2);
                assert_eq!(d.series[0].points(), &[(0.0, 1.0), (1.0, 2.0)]);
                assert_eq!(d.series[1].points(), &[(0.0, 3.0)]);
                assert_eq!(d.params.get("trig_mode"), Some(1.0));
                assert!(!d.again);
                assert_eq!(d.force_x, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_poll_again_and_forced_x() {
        let r = decode(
            r#"{"status":"AGAIN","app":{"id":"digdar"},
                "datasets":{"params":{"forcex_flag":1,"xmin":0,"xmax":8}}}"#,
        );
        match classify_poll(r, "digdar") {
            PollOutcome::Data(d) => {
                assert!(d.again);
                assert_eq!(d.force_x, Some((0.0, 8.0)));
                assert!(d.series.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_poll_error_wins() {
        let r = decode(r#"{"status":"ERROR","reason":"not running","datasets":{"params":{}}}"#);
        assert_eq!(
            classify_poll(r, "digdar"),
            PollOutcome::ServerError {
                reason: Some("not running".into())
            }
        );
    }

    #[test]
    fn test_poll_app_mismatch() {
        let r = decode(r#"{"status":"OK","app":{"id":"scope"},"datasets":{"params":{}}}"#);
        assert_eq!(
            classify_poll(r, "digdar"),
            PollOutcome::AppMismatch {
                reported: Some("scope".into())
            }
        );
    }

    #[test]
    fn test_poll_malformed() {
        let r = decode(r#"{"status":"OK","app":{"id":"digdar"}}"#);
        assert_eq!(classify_poll(r, "digdar"), PollOutcome::Malformed);
        let r = decode(r#"{"status":"SOMETHING","datasets":{}}"#);
        assert_eq!(classify_poll(r, "digdar"), PollOutcome::Malformed);
    }

    #[test]
    fn test_push_autoscale_window() {
        let r = decode(
            r#"{"datasets":{"params":{"auto_flag":0,"min_y":-0.5,"max_y":0.5,"xmin":0,"xmax":130,"forcex_flag":1}}}"#,
        );
        match classify_push(r.clone(), true) {
            PushOutcome::Accepted(d) => {
                let w = d.autoscale.unwrap();
                assert_eq!(w.x, (0.0, 130.0));
                assert_eq!(w.y, (-0.5, 0.5));
                assert_eq!(d.force_x, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        match classify_push(r, false) {
            PushOutcome::Accepted(d) => {
                assert_eq!(d.autoscale, None);
                assert_eq!(d.force_x, Some((0.0, 130.0)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_push_flat_autoscale_is_ignored() {
        let r = decode(r#"{"datasets":{"params":{"min_y":0,"max_y":0,"xmin":0,"xmax":1}}}"#);
        match classify_push(r, true) {
            PushOutcome::Accepted(d) => assert_eq!(d.autoscale, None),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_push_failures() {
        let r = decode(r#"{"status":"ERROR"}"#);
        assert_eq!(classify_push(r, false), PushOutcome::ServerError { reason: None });
        let r = decode(r#"{"status":"OK"}"#);
        assert_eq!(classify_push(r, false), PushOutcome::Unexpected);
    }

    #[test]
    fn test_push_body() {
        let p = ParameterSet::from_pairs(&[("trig_mode", 1.0)]);
        let body = PushRequest::new(&p).to_vec().unwrap();
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["datasets"]["params"]["trig_mode"], 1.0);
    }

    #[test]
    fn test_param_document_forms() {
        let p = parse_param_document(r#"{"trig_mode": 2}"#).unwrap();
        assert_eq!(p.get("trig_mode"), Some(2.0));
        let p = parse_param_document(r#""{\"trig_mode\": 0}""#).unwrap();
        assert_eq!(p.get("trig_mode"), Some(0.0));
        assert!(matches!(
            parse_param_document("[1,2]"),
            Err(ProtocolError::InvalidParams(_))
        ));
        assert!(matches!(
            parse_param_document("not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_body_errors_are_malformed() {
        assert!(matches!(
            DataResponse::from_slice(b"<html>"),
            Err(ProtocolError::Malformed(_))
        ));
        // Missing datasets is a classification outcome, not a decode error
        let r = DataResponse::from_slice(br#"{"status":"OK","app":{"id":"digdar"}}"#).unwrap();
        assert_eq!(classify_poll(r, "digdar"), PollOutcome::Malformed);
    }
}
