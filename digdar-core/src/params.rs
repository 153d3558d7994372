//! Instrument parameters: confirmed and local snapshots.
//!
//! The server is the source of truth for every parameter. The client keeps
//! two copies: `confirmed`, the last snapshot the server acknowledged, and
//! `local`, which additionally carries edits the operator has made but that
//! have not been pushed yet. A parameter is dirty when the two disagree.
//!
//! ```text
//!   operator edit ──► local ──push──► server
//!                       ▲                │
//!                       └─── adopt ◄─────┘  (confirmed := server, local := confirmed)
//! ```
//!
//! While the operator is editing, adoption only merges the unit tracking
//! field group so that half typed values are not overwritten mid-edit.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Field names
// =============================================================================

/// Requests a server side autoscale on the next push. Cleared by the server.
pub const AUTO_FLAG: &str = "auto_flag";
/// Marks a push as a single-shot acquisition.
pub const SINGLE_BTN: &str = "single_btn";
/// Server asks the client to adopt `xmin`/`xmax` as the visible window.
pub const FORCEX_FLAG: &str = "forcex_flag";
pub const TRIG_MODE: &str = "trig_mode";
pub const TRIG_SOURCE: &str = "trig_source";
pub const TIME_UNITS: &str = "time_units";
pub const TIME_RANGE: &str = "time_range";
pub const XMIN: &str = "xmin";
pub const XMAX: &str = "xmax";
pub const MIN_Y: &str = "min_y";
pub const MAX_Y: &str = "max_y";
pub const EN_AVG_AT_DEC: &str = "en_avg_at_dec";
pub const GUI_RESET_Y_RANGE: &str = "gui_reset_y_range";
pub const DIGDAR_TRIG_DELAY: &str = "digdar_trig_delay";

/// Fields that are only ever sent, never compared.
pub const PUSH_ONLY_FIELDS: &[&str] = &[AUTO_FLAG, SINGLE_BTN];

/// Fields merged into both snapshots even while the operator is editing.
pub const UNIT_TRACKING_FIELDS: &[&str] = &[TIME_UNITS];

/// Delay and latency controls are entered in samples; the server stores
/// them in units of eight samples.
pub const SAMPLES_PER_UNIT: f64 = 8.0;

/// Maximum x span (in the current time unit) for each `time_range` setting.
pub const TIME_RANGE_MAX: [f64; 6] = [130.0, 1000.0, 8.0, 130.0, 1.0, 8.0];

// =============================================================================
// ParameterSet
// =============================================================================

/// Mapping from parameter name to scalar value.
///
/// Deserialisation is tolerant: numbers are kept, booleans become `0`/`1`
/// and any other JSON value is dropped, so a single odd field never
/// invalidates a whole response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParameterSet(BTreeMap<String, f64>);

impl ParameterSet {
    pub fn new() -> Self {
        ParameterSet(BTreeMap::new())
    }

    /// Build from literal pairs.
    pub fn from_pairs(pairs: &[(&str, f64)]) -> Self {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn set(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<f64> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    /// Value of `key` interpreted as an integer code.
    pub fn code(&self, key: &str) -> Option<i64> {
        self.get(key).map(|v| v.round() as i64)
    }

    /// True when `key` is present and equal to 1.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key) == Some(1.0)
    }

    /// `xmin`/`xmax` as a pair, if both are present.
    pub fn x_window(&self) -> Option<(f64, f64)> {
        Some((self.get(XMIN)?, self.get(XMAX)?))
    }

    pub fn trigger_mode(&self) -> Option<TriggerMode> {
        self.code(TRIG_MODE).and_then(TriggerMode::from_code)
    }

    pub fn trigger_source(&self) -> Option<TriggerSource> {
        self.code(TRIG_SOURCE).map(TriggerSource::from_code)
    }
}

impl FromIterator<(String, f64)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        ParameterSet(iter.into_iter().collect())
    }
}

impl<'de> Deserialize<'de> for ParameterSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .filter_map(|(k, v)| scalar(&v).map(|x| (k, x)))
            .collect())
    }
}

fn scalar(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

// =============================================================================
// Trigger settings
// =============================================================================

/// Trigger mode (`trig_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerMode {
    /// Free running, no trigger levels apply
    Continuous,
    /// Acquire on every trigger
    Normal,
    /// One acquisition per single-shot request
    Single,
}

impl TriggerMode {
    pub fn from_code(code: i64) -> Option<TriggerMode> {
        match code {
            0 => Some(TriggerMode::Continuous),
            1 => Some(TriggerMode::Normal),
            2 => Some(TriggerMode::Single),
            _ => None,
        }
    }

    pub fn code(self) -> f64 {
        match self {
            TriggerMode::Continuous => 0.0,
            TriggerMode::Normal => 1.0,
            TriggerMode::Single => 2.0,
        }
    }

    /// Continuous and normal mode keep the poll loop running.
    pub fn autorun(self) -> bool {
        !matches!(self, TriggerMode::Single)
    }
}

impl std::fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerMode::Continuous => write!(f, "Continuous"),
            TriggerMode::Normal => write!(f, "Normal"),
            TriggerMode::Single => write!(f, "Single"),
        }
    }
}

/// Trigger source (`trig_source`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSource {
    /// Level trigger on the video channel
    Level,
    /// External trigger input, no levels
    External,
    /// Radar trigger pulse
    Trigger,
    /// Azimuth count pulse
    Acp,
    /// Heading marker
    Arp,
    /// Any other source code
    Other(u8),
}

impl TriggerSource {
    pub fn from_code(code: i64) -> TriggerSource {
        match code {
            0 => TriggerSource::Level,
            2 => TriggerSource::External,
            3 => TriggerSource::Trigger,
            4 => TriggerSource::Acp,
            5 => TriggerSource::Arp,
            other => TriggerSource::Other(other.clamp(0, u8::MAX as i64) as u8),
        }
    }

    pub fn code(self) -> f64 {
        match self {
            TriggerSource::Level => 0.0,
            TriggerSource::External => 2.0,
            TriggerSource::Trigger => 3.0,
            TriggerSource::Acp => 4.0,
            TriggerSource::Arp => 5.0,
            TriggerSource::Other(c) => c as f64,
        }
    }

    /// Parameter holding the excite (arming) level for this source.
    pub fn excite_field(self) -> Option<&'static str> {
        match self {
            TriggerSource::Level => Some("trig_level"),
            TriggerSource::Trigger => Some("digdar_trig_excite"),
            TriggerSource::Acp => Some("digdar_acp_excite"),
            TriggerSource::Arp => Some("digdar_arp_excite"),
            _ => None,
        }
    }

    /// Parameter holding the relax (re-arm) level for this source.
    pub fn relax_field(self) -> Option<&'static str> {
        match self {
            TriggerSource::Level => Some("trig_level"),
            TriggerSource::Trigger => Some("digdar_trig_relax"),
            TriggerSource::Acp => Some("digdar_acp_relax"),
            TriggerSource::Arp => Some("digdar_arp_relax"),
            _ => None,
        }
    }

    /// Parameter holding the dead time after a trigger for this source.
    pub fn latency_field(self) -> Option<&'static str> {
        match self {
            TriggerSource::Trigger => Some("digdar_trig_latency"),
            TriggerSource::Acp => Some("digdar_acp_latency"),
            TriggerSource::Arp => Some("digdar_arp_latency"),
            _ => None,
        }
    }
}

/// Parameters posted after the application has been started on the server.
pub fn default_params() -> ParameterSet {
    ParameterSet::from_pairs(&[
        (EN_AVG_AT_DEC, 1.0),
        (TRIG_SOURCE, TriggerSource::Trigger.code()),
        (TRIG_MODE, TriggerMode::Normal.code()),
    ])
}

// =============================================================================
// ParamStore
// =============================================================================

/// How a server snapshot was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Adoption {
    /// Both snapshots were replaced
    Full,
    /// Only the unit tracking fields were merged
    UnitsOnly,
}

/// Confirmed and local parameter snapshots.
///
/// Invariant: `local` always holds at least every key of `confirmed`.
#[derive(Debug, Clone, Default)]
pub struct ParamStore {
    confirmed: Option<ParameterSet>,
    local: ParameterSet,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until the first server round trip has completed.
    pub fn confirmed(&self) -> Option<&ParameterSet> {
        self.confirmed.as_ref()
    }

    pub fn local(&self) -> &ParameterSet {
        &self.local
    }

    /// Parameter dependent features are disabled until this is true.
    pub fn is_ready(&self) -> bool {
        self.confirmed.is_some()
    }

    /// Apply a snapshot received from the server.
    pub fn adopt(&mut self, server: ParameterSet, editing: bool) -> Adoption {
        if editing {
            if let Some(confirmed) = self.confirmed.as_mut() {
                for field in UNIT_TRACKING_FIELDS {
                    if let Some(value) = server.get(field) {
                        confirmed.set(*field, value);
                        self.local.set(*field, value);
                    }
                }
                return Adoption::UnitsOnly;
            }
        }
        self.local = server.clone();
        self.confirmed = Some(server);
        Adoption::Full
    }

    /// True iff some confirmed key has a different local value.
    pub fn is_dirty(&self) -> bool {
        self.dirty_iter().next().is_some()
    }

    /// Keys whose local value differs from the confirmed one.
    pub fn dirty_keys(&self) -> Vec<String> {
        self.dirty_iter().map(|k| k.to_string()).collect()
    }

    fn dirty_iter(&self) -> impl Iterator<Item = &str> {
        self.confirmed
            .iter()
            .flat_map(|c| c.iter())
            .filter(|(k, _)| !PUSH_ONLY_FIELDS.contains(k))
            .filter(|(k, v)| self.local.get(k) != Some(*v))
            .map(|(k, _)| k)
    }

    /// Edit one local value.
    pub fn set(&mut self, key: impl Into<String>, value: f64) {
        self.local.set(key, value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.local.get(key)
    }

    /// Replace the local snapshot with a loaded document. Keys the document
    /// does not mention keep their current local value.
    pub fn replace_local(&mut self, params: ParameterSet) {
        let mut local = self.local.clone();
        for (k, v) in params.iter() {
            local.set(k, v);
        }
        self.local = local;
    }

    /// True when the operator has asked for a server side autoscale.
    pub fn auto_requested(&self) -> bool {
        self.local.flag(AUTO_FLAG)
    }

    /// The payload for a push: the local snapshot plus the single-shot flag.
    pub fn outbound(&self, single: bool) -> ParameterSet {
        let mut out = self.local.clone();
        out.set(SINGLE_BTN, if single { 1.0 } else { 0.0 });
        out
    }

    /// Forget everything, as on an application restart.
    pub fn reset(&mut self) {
        self.confirmed = None;
        self.local = ParameterSet::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed_sample() -> ParameterSet {
        ParameterSet::from_pairs(&[
            (TRIG_MODE, 1.0),
            (TRIG_SOURCE, 3.0),
            ("digdar_trig_excite", 0.5),
        ])
    }

    #[test]
    fn test_tolerant_deserialisation() {
        let p: ParameterSet =
            serde_json::from_str(r#"{"a": 1, "b": 2.5, "c": true, "d": "text", "e": null}"#)
                .unwrap();
        assert_eq!(p.get("a"), Some(1.0));
        assert_eq!(p.get("b"), Some(2.5));
        assert_eq!(p.get("c"), Some(1.0));
        assert!(!p.contains_key("d"));
        assert!(!p.contains_key("e"));
    }

    #[test]
    fn test_not_ready_before_first_adoption() {
        let store = ParamStore::new();
        assert!(!store.is_ready());
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_clean_after_adopt() {
        let mut store = ParamStore::new();
        assert_eq!(store.adopt(confirmed_sample(), false), Adoption::Full);
        assert!(store.is_ready());
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_edit_then_echo() {
        let mut store = ParamStore::new();
        store.adopt(confirmed_sample(), false);

        store.set("digdar_trig_excite", 0.6);
        assert!(store.is_dirty());
        assert_eq!(store.dirty_keys(), vec!["digdar_trig_excite".to_string()]);

        // Server echoes the pushed value
        let echo = store.local().clone();
        store.adopt(echo, false);
        assert!(!store.is_dirty());
        assert_eq!(store.confirmed().unwrap().get("digdar_trig_excite"), Some(0.6));
    }

    #[test]
    fn test_auto_flag_does_not_make_dirty() {
        let mut store = ParamStore::new();
        let mut server = confirmed_sample();
        server.set(AUTO_FLAG, 0.0);
        store.adopt(server, false);

        store.set(AUTO_FLAG, 1.0);
        assert!(!store.is_dirty());
        assert!(store.auto_requested());
    }

    #[test]
    fn test_editing_merges_units_only() {
        let mut store = ParamStore::new();
        let mut server = confirmed_sample();
        server.set(TIME_UNITS, 0.0);
        store.adopt(server, false);
        store.set("digdar_trig_excite", 0.7);

        let mut update = confirmed_sample();
        update.set("digdar_trig_excite", 0.1);
        update.set(TIME_UNITS, 1.0);
        assert_eq!(store.adopt(update, true), Adoption::UnitsOnly);

        assert_eq!(store.get("digdar_trig_excite"), Some(0.7));
        assert_eq!(store.get(TIME_UNITS), Some(1.0));
        assert_eq!(store.confirmed().unwrap().get(TIME_UNITS), Some(1.0));
        assert_eq!(store.confirmed().unwrap().get("digdar_trig_excite"), Some(0.5));
    }

    #[test]
    fn test_first_adoption_is_full_even_when_editing() {
        let mut store = ParamStore::new();
        assert_eq!(store.adopt(confirmed_sample(), true), Adoption::Full);
        assert_eq!(store.get(TRIG_MODE), Some(1.0));
    }

    #[test]
    fn test_factory_round_trip_is_clean() {
        // Factory documents arrive string-wrapped, with booleans and labels
        let body = r#""{\"trig_mode\": 0, \"en_avg_at_dec\": true, \"xmax\": 130.0, \"label\": \"factory\"}""#;
        let factory = crate::protocol::parse_param_document(body).unwrap();
        assert_eq!(factory.get(EN_AVG_AT_DEC), Some(1.0));
        assert!(!factory.contains_key("label"));

        let mut store = ParamStore::new();
        store.adopt(factory.clone(), false);
        assert!(!store.is_dirty());
        assert!(store.dirty_keys().is_empty());
        assert_eq!(store.local(), &factory);
    }

    #[test]
    fn test_replace_local_keeps_superset() {
        let mut store = ParamStore::new();
        store.adopt(confirmed_sample(), false);
        store.replace_local(ParameterSet::from_pairs(&[(TRIG_MODE, 2.0)]));

        assert_eq!(store.get(TRIG_MODE), Some(2.0));
        assert_eq!(store.get(TRIG_SOURCE), Some(3.0));
        assert_eq!(store.confirmed().unwrap().get(TRIG_MODE), Some(1.0));
        assert!(store.is_dirty());
    }

    #[test]
    fn test_outbound_carries_single_flag_only_in_payload() {
        let mut store = ParamStore::new();
        store.adopt(confirmed_sample(), false);
        assert_eq!(store.outbound(true).get(SINGLE_BTN), Some(1.0));
        assert_eq!(store.outbound(false).get(SINGLE_BTN), Some(0.0));
        assert!(!store.local().contains_key(SINGLE_BTN));
    }

    #[test]
    fn test_trigger_field_names() {
        assert_eq!(TriggerSource::Level.excite_field(), Some("trig_level"));
        assert_eq!(TriggerSource::Level.relax_field(), Some("trig_level"));
        assert_eq!(TriggerSource::Level.latency_field(), None);
        assert_eq!(TriggerSource::Acp.excite_field(), Some("digdar_acp_excite"));
        assert_eq!(TriggerSource::Arp.relax_field(), Some("digdar_arp_relax"));
        assert_eq!(TriggerSource::Trigger.latency_field(), Some("digdar_trig_latency"));
        assert_eq!(TriggerSource::External.excite_field(), None);
        assert_eq!(TriggerSource::from_code(7), TriggerSource::Other(7));
    }

    #[test]
    fn test_trigger_mode_autorun() {
        assert!(TriggerMode::Continuous.autorun());
        assert!(TriggerMode::Normal.autorun());
        assert!(!TriggerMode::Single.autorun());
        assert_eq!(TriggerMode::from_code(5), None);
    }

    #[test]
    fn test_default_params() {
        let d = default_params();
        assert_eq!(d.get(EN_AVG_AT_DEC), Some(1.0));
        assert_eq!(d.get(TRIG_SOURCE), Some(3.0));
        assert_eq!(d.get(TRIG_MODE), Some(1.0));
    }
}
