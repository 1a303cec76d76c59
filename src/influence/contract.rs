//! The update contract: whitelisted sections, their clamp ranges, forbidden
//! keys, and the structured error every governance failure is reported as.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const WEIGHTS_SCHEMA: &str = "aion.trading.decision_influence_weights.v1";
pub const AUDIT_SCHEMA: &str = "aion.trading.decision_influence_audit.v1";

/// Keys that may never appear anywhere in an update.
pub const FORBIDDEN_KEYS: &[&str] = &[
    "max_risk_per_trade",
    "max_daily_risk",
    "max_weekly_risk",
    "position_sizing",
    "execution_authorization",
    "live_trading_enabled",
];

/// Confidence assumed when a raw payload omits it.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    SetupConfidenceWeights,
    PairSessionPreferences,
    StandDownSensitivity,
    LlmTrustWeights,
    EventCautionMultipliers,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::SetupConfidenceWeights,
        Section::PairSessionPreferences,
        Section::StandDownSensitivity,
        Section::LlmTrustWeights,
        Section::EventCautionMultipliers,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Section::SetupConfidenceWeights => "setup_confidence_weights",
            Section::PairSessionPreferences => "pair_session_preferences",
            Section::StandDownSensitivity => "stand_down_sensitivity",
            Section::LlmTrustWeights => "llm_trust_weights",
            Section::EventCautionMultipliers => "event_caution_multipliers",
        }
    }

    pub fn from_name(name: &str) -> Option<Section> {
        Section::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Closed interval every stored leaf of this section lies in.
    pub fn clamp_range(self) -> (f64, f64) {
        match self {
            Section::SetupConfidenceWeights => (0.0, 2.0),
            Section::PairSessionPreferences => (0.0, 2.0),
            Section::StandDownSensitivity => (0.5, 2.0),
            Section::LlmTrustWeights => (0.0, 2.0),
            Section::EventCautionMultipliers => (0.5, 3.0),
        }
    }

    pub fn clamp(self, value: f64) -> f64 {
        let (lo, hi) = self.clamp_range();
        value.clamp(lo, hi)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorType {
    ValueError,
    PermissionError,
    IOError,
    RuntimeError,
}

/// `{type, message}` as carried in results and audit rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceError {
    #[serde(rename = "type")]
    pub kind: ErrorType,
    pub message: String,
}

impl GovernanceError {
    pub fn new(kind: ErrorType, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(ErrorType::ValueError, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorType::PermissionError, message)
    }
}

impl fmt::Display for GovernanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for GovernanceError {}

/// A typed update request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluenceUpdate {
    pub session_id: String,
    pub turn_id: String,
    pub source: String,
    #[serde(default)]
    pub reason: String,
    pub updates: Value,
    pub confidence: f64,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn string_field(payload: &Map<String, Value>, key: &str) -> String {
    match payload.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

impl InfluenceUpdate {
    pub fn new(
        session_id: impl Into<String>,
        turn_id: impl Into<String>,
        source: impl Into<String>,
        updates: Value,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            turn_id: turn_id.into(),
            source: source.into(),
            reason: String::new(),
            updates,
            confidence: DEFAULT_CONFIDENCE,
            metadata: empty_object(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Build an update from an untyped payload. `patch` wins over
    /// `updates`; a missing `source` becomes `default_source`. Nothing is
    /// validated here.
    pub fn from_payload(payload: &Map<String, Value>, default_source: &str) -> Self {
        let updates = payload
            .get("patch")
            .filter(|v| !v.is_null())
            .or_else(|| payload.get("updates"))
            .cloned()
            .unwrap_or_else(empty_object);
        let mut source = string_field(payload, "source");
        if source.is_empty() {
            source = default_source.to_string();
        }
        let confidence = match payload.get("confidence") {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(f64::NAN),
            None | Some(Value::Null) => DEFAULT_CONFIDENCE,
            Some(_) => f64::NAN,
        };
        let metadata = match payload.get("metadata") {
            None | Some(Value::Null) => empty_object(),
            Some(v) => v.clone(),
        };
        Self {
            session_id: string_field(payload, "session_id"),
            turn_id: string_field(payload, "turn_id"),
            source,
            reason: string_field(payload, "reason"),
            updates,
            confidence,
            metadata,
        }
    }

    /// The `updates` mapping. Only meaningful after [`validate`](Self::validate).
    pub fn sections(&self) -> Option<&Map<String, Value>> {
        self.updates.as_object()
    }

    /// Contract checks, in order: mapping shape, forbidden keys, unknown
    /// sections, identity fields, confidence, metadata.
    pub fn validate(&self) -> Result<(), GovernanceError> {
        let Some(updates) = self.updates.as_object() else {
            return Err(GovernanceError::value("updates must be a mapping"));
        };
        if let Some(key) = find_forbidden(updates) {
            return Err(GovernanceError::value(format!("forbidden decision influence key: {key}")));
        }
        if let Some(key) = updates.keys().find(|k| Section::from_name(k).is_none()) {
            return Err(GovernanceError::value(format!("unknown decision influence section: {key}")));
        }
        for (field, value) in [
            ("session_id", &self.session_id),
            ("turn_id", &self.turn_id),
            ("source", &self.source),
        ] {
            if value.trim().is_empty() {
                return Err(GovernanceError::value(format!("missing required field: {field}")));
            }
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(GovernanceError::value("confidence must be a number within [0, 1]"));
        }
        if !self.metadata.is_object() {
            return Err(GovernanceError::value("metadata must be a mapping"));
        }
        Ok(())
    }
}

/// First forbidden key found at any depth, in map order.
pub fn find_forbidden(map: &Map<String, Value>) -> Option<&str> {
    for (key, value) in map {
        if FORBIDDEN_KEYS.contains(&key.as_str()) {
            return Some(key);
        }
        if let Value::Object(inner) = value {
            if let Some(found) = find_forbidden(inner) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(updates: Value) -> InfluenceUpdate {
        InfluenceUpdate::new("s1", "t1", "unit", updates)
    }

    #[test]
    fn clamp_table() {
        assert_eq!(Section::LlmTrustWeights.clamp(9.9), 2.0);
        assert_eq!(Section::StandDownSensitivity.clamp(0.1), 0.5);
        assert_eq!(Section::EventCautionMultipliers.clamp(2.5), 2.5);
        assert_eq!(Section::from_name("pair_session_preferences"), Some(Section::PairSessionPreferences));
        assert_eq!(Section::from_name("nope"), None);
    }

    #[test]
    fn forbidden_key_wins_over_identity() {
        let mut u = update(json!({"max_risk_per_trade": 0.5}));
        u.session_id.clear();
        let err = u.validate().unwrap_err();
        assert_eq!(err.kind, ErrorType::ValueError);
        assert!(err.message.contains("forbidden decision influence key"));
    }

    #[test]
    fn nested_forbidden_key() {
        let err = update(json!({"llm_trust_weights": {"position_sizing": 1.0}})).validate().unwrap_err();
        assert_eq!(err.message, "forbidden decision influence key: position_sizing");
    }

    #[test]
    fn unknown_section_and_identity() {
        let err = update(json!({"volatility": {}})).validate().unwrap_err();
        assert_eq!(err.message, "unknown decision influence section: volatility");

        let mut u = update(json!({}));
        u.turn_id = "  ".into();
        assert_eq!(u.validate().unwrap_err().message, "missing required field: turn_id");

        assert!(update(json!([])).validate().is_err());
        assert!(update(json!({})).with_confidence(1.5).validate().is_err());
        assert!(update(json!({})).validate().is_ok());
    }

    #[test]
    fn payload_prefers_patch_and_defaults_source() {
        let payload = json!({
            "patch": {"llm_trust_weights": {"claude": 1.0}},
            "updates": {"llm_trust_weights": {"gpt": 1.0}},
            "session_id": "s", "turn_id": 7,
        });
        let u = InfluenceUpdate::from_payload(payload.as_object().unwrap(), "router");
        assert_eq!(u.updates, json!({"llm_trust_weights": {"claude": 1.0}}));
        assert_eq!(u.source, "router");
        assert_eq!(u.turn_id, "7");
        assert_eq!(u.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn error_serializes_with_type_key() {
        let e = GovernanceError::permission("nope");
        assert_eq!(serde_json::to_value(&e).unwrap(), json!({"type": "PermissionError", "message": "nope"}));
    }
}
