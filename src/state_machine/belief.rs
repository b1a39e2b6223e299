//! The evolving belief state carried across stages.
//!
//! [`BeliefState`] is the typed record the orchestrator persists. Anything
//! coming from the reasoning service (or from an older persisted blob) goes
//! through [`BeliefState::coerce`] so a loosely-shaped payload can never
//! replace the typed record wholesale.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Confidence assigned to a freshly started marathon.
pub const INITIAL_CONFIDENCE: f64 = 0.5;

/// Current on-disk schema version of a persisted belief state.
pub const BELIEF_SCHEMA_VERSION: u32 = 1;

/// Clamps a confidence into `[0, 1]`; non-finite values collapse to 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// What a single stage contributed to the belief state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageInsight {
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

/// How a correction entered the record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    /// Narrated by the reasoning service.
    #[default]
    Explicit,
    /// Synthesized because confidence dropped without explanation.
    ConfidenceDrop,
}

impl fmt::Display for CorrectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrectionKind::Explicit => write!(f, "explicit"),
            CorrectionKind::ConfidenceDrop => write!(f, "confidence_drop"),
        }
    }
}

/// A recorded contradiction between an earlier belief and new evidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelfCorrection {
    pub stage: String,
    pub original_belief: String,
    pub correction: String,
    pub impact: String,
    #[serde(default)]
    pub kind: CorrectionKind,
}

/// Structured summary of what is currently believed about a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefState {
    #[serde(default)]
    pub core_strengths: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub hiring_thesis: String,
    pub decision_confidence: f64,
    #[serde(default)]
    pub stage_insights: BTreeMap<String, StageInsight>,
    #[serde(default)]
    pub self_corrections: Vec<SelfCorrection>,
}

impl Default for BeliefState {
    fn default() -> Self {
        Self::initial()
    }
}

impl BeliefState {
    pub fn initial() -> Self {
        Self {
            core_strengths: Vec::new(),
            concerns: Vec::new(),
            hiring_thesis: String::new(),
            decision_confidence: INITIAL_CONFIDENCE,
            stage_insights: BTreeMap::new(),
            self_corrections: Vec::new(),
        }
    }

    /// Builds a belief state from an untrusted JSON value.
    ///
    /// Fields that are missing or of the wrong shape keep their value from
    /// `prior`. Confidences are clamped into `[0, 1]`.
    pub fn coerce(value: &Value, prior: &BeliefState) -> BeliefState {
        let Some(obj) = value.as_object() else {
            return prior.clone();
        };

        let mut belief = prior.clone();
        if let Some(list) = obj.get("core_strengths").and_then(string_list) {
            belief.core_strengths = list;
        }
        if let Some(list) = obj.get("concerns").and_then(string_list) {
            belief.concerns = list;
        }
        if let Some(thesis) = obj.get("hiring_thesis").and_then(Value::as_str) {
            belief.hiring_thesis = thesis.to_string();
        }
        if let Some(conf) = obj.get("decision_confidence").and_then(Value::as_f64) {
            belief.decision_confidence = conf;
        }
        // Insights merge per stage: an update naming only the current stage
        // keeps the findings of earlier ones.
        if let Some(map) = obj.get("stage_insights").and_then(Value::as_object) {
            for (stage, raw) in map {
                belief.stage_insights.insert(stage.clone(), coerce_insight(raw));
            }
        }
        if let Some(list) = obj.get("self_corrections").and_then(Value::as_array) {
            belief.self_corrections = list.iter().filter_map(coerce_correction).collect();
        }
        belief.decision_confidence = clamp_confidence(belief.decision_confidence);
        belief
    }
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
        ),
        Value::String(s) => Some(vec![s.clone()]),
        _ => None,
    }
}

fn text_field(obj: &serde_json::Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn coerce_insight(value: &Value) -> StageInsight {
    let Some(obj) = value.as_object() else {
        return StageInsight::default();
    };
    StageInsight {
        key_findings: obj.get("key_findings").and_then(string_list).unwrap_or_default(),
        evidence: obj.get("evidence").and_then(string_list).unwrap_or_default(),
        score: obj
            .get("score")
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite()),
    }
}

fn coerce_correction(value: &Value) -> Option<SelfCorrection> {
    match value {
        Value::String(text) => Some(SelfCorrection {
            correction: text.clone(),
            ..Default::default()
        }),
        Value::Object(obj) => Some(SelfCorrection {
            stage: text_field(obj, "stage"),
            original_belief: text_field(obj, "original_belief"),
            correction: text_field(obj, "correction"),
            impact: text_field(obj, "impact"),
            kind: obj
                .get("kind")
                .or_else(|| obj.get("type"))
                .cloned()
                .and_then(|k| serde_json::from_value(k).ok())
                .unwrap_or_default(),
        }),
        _ => None,
    }
}

/// Error raised when a persisted belief blob cannot be read.
#[derive(Debug, thiserror::Error)]
pub enum BeliefDecodeError {
    #[error("unsupported belief schema version {0}")]
    UnsupportedVersion(u64),

    #[error("malformed belief envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Wraps a belief state in its versioned persistence envelope.
pub fn encode_persisted(belief: &BeliefState) -> Value {
    serde_json::json!({
        "schema_version": BELIEF_SCHEMA_VERSION,
        "belief": belief,
    })
}

/// Reads a persisted belief state, migrating untagged legacy blobs.
pub fn decode_persisted(value: Value) -> Result<BeliefState, BeliefDecodeError> {
    match value.get("schema_version").and_then(Value::as_u64) {
        // Untagged blobs predate versioning: accept any shape we can coerce.
        None => Ok(BeliefState::coerce(&value, &BeliefState::initial())),
        Some(1) => {
            let belief = value
                .get("belief")
                .cloned()
                .unwrap_or(Value::Null);
            let mut belief: BeliefState = serde_json::from_value(belief)?;
            belief.decision_confidence = clamp_confidence(belief.decision_confidence);
            Ok(belief)
        }
        Some(other) => Err(BeliefDecodeError::UnsupportedVersion(other)),
    }
}

/// `serde(with = ...)` adapter storing a belief state inside its envelope.
pub mod versioned {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    use super::{BeliefState, decode_persisted, encode_persisted};

    pub fn serialize<S: Serializer>(belief: &BeliefState, s: S) -> Result<S::Ok, S::Error> {
        encode_persisted(belief).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BeliefState, D::Error> {
        let value = Value::deserialize(d)?;
        decode_persisted(value).map_err(D::Error::custom)
    }
}
