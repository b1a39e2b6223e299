//! Turns one process state into a validated [`DecisionResult`].
//!
//! Fetches the evidence for the current stage, asks the reasoning service,
//! and validates what comes back. The outcome is always one of two shapes:
//! a parsed result, or the safe fallback (escalate, zero confidence). Only a
//! service that could not be reached at all is reported as an error, so the
//! caller can block and retry instead of escalating.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::{MarathonError, Result};
use crate::reasoning::{ReasoningContext, ReasoningError, ReasoningService};
use crate::stage_data::StageDataProvider;
use crate::state_machine::{BeliefState, DecisionResult, DecisionType, ProcessState, clamp_confidence};

const MISSING_REASONING: &str = "No reasoning provided by the reasoning service";

#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    Decided(DecisionResult),
    /// The response was unusable; `result` is the safe escalation.
    Fallback { result: DecisionResult, cause: String },
}

impl Assessment {
    pub fn into_result(self) -> DecisionResult {
        match self {
            Assessment::Decided(result) | Assessment::Fallback { result, .. } => result,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Assessment::Fallback { .. })
    }
}

pub struct BeliefStateManager {
    reasoner: Arc<dyn ReasoningService>,
    stage_data: Arc<dyn StageDataProvider>,
    timeout: Duration,
}

impl BeliefStateManager {
    pub fn new(
        reasoner: Arc<dyn ReasoningService>,
        stage_data: Arc<dyn StageDataProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            reasoner,
            stage_data,
            timeout,
        }
    }

    /// Run one reasoning pass for `process` at its current stage.
    ///
    /// # Errors
    ///
    /// - `StageData` if the stage evidence could not be fetched
    /// - `ReasoningUnreachable` on connection failure or timeout
    pub async fn evaluate(&self, process: &ProcessState) -> Result<Assessment> {
        let stage = process.current_stage;
        let stage_data = self.stage_data.fetch(process, stage).await?;
        let context = ReasoningContext {
            process_id: process.id,
            job_id: process.job_id.clone(),
            application_id: process.application_id.clone(),
            stage,
            belief_state: process.belief_state.clone(),
            stage_data,
            correction_count: process.correction_count,
        };

        let raw = match tokio::time::timeout(self.timeout, self.reasoner.reason(&context)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) if e.is_unreachable() => return Err(MarathonError::ReasoningUnreachable(e)),
            Ok(Err(e)) => return Ok(fallback(process, e.to_string())),
            Err(_) => {
                return Err(MarathonError::ReasoningUnreachable(ReasoningError::Timeout(
                    self.timeout,
                )));
            }
        };

        match parse_decision(&raw, &process.belief_state) {
            Ok(result) => Ok(Assessment::Decided(result)),
            Err(cause) => Ok(fallback(process, cause)),
        }
    }
}

fn fallback(process: &ProcessState, cause: String) -> Assessment {
    tracing::warn!(
        process_id = %process.id,
        stage = %process.current_stage,
        cause = %cause,
        "reasoning response unusable, falling back to escalation"
    );
    Assessment::Fallback {
        result: DecisionResult::fallback(&process.belief_state, &cause),
        cause,
    }
}

/// Pull the outermost JSON object out of a response that may wrap it in
/// prose or a fenced code block.
fn extract_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

/// Validate a raw reasoning response against the prior belief state.
///
/// `decision` must be one of the four decision words and `confidence` a
/// finite number (clamped into `[0, 1]`). Everything else is coerced: a
/// missing belief update keeps the prior belief, missing belief fields keep
/// their prior values.
pub fn parse_decision(raw: &str, prior: &BeliefState) -> std::result::Result<DecisionResult, String> {
    let body = extract_object(raw).ok_or_else(|| "response contains no JSON object".to_string())?;
    let value: Value = serde_json::from_str(body).map_err(|e| format!("invalid JSON: {e}"))?;
    let obj: &Map<String, Value> = value
        .as_object()
        .ok_or_else(|| "response is not a JSON object".to_string())?;

    let decision: DecisionType = obj
        .get("decision")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing decision".to_string())?
        .parse()?;

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_f64)
        .filter(|c| c.is_finite())
        .map(clamp_confidence)
        .ok_or_else(|| "missing or non-numeric confidence".to_string())?;

    let reasoning = obj
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(MISSING_REASONING)
        .to_string();

    let belief_value = obj.get("updated_belief_state").unwrap_or(&Value::Null);
    let mut updated_belief_state = BeliefState::coerce(belief_value, prior);
    let belief_has_confidence = belief_value
        .get("decision_confidence")
        .and_then(Value::as_f64)
        .is_some();
    if !belief_has_confidence {
        updated_belief_state.decision_confidence = confidence;
    }

    Ok(DecisionResult {
        decision,
        confidence,
        reasoning,
        updated_belief_state,
        next_action: obj
            .get("next_action")
            .and_then(Value::as_str)
            .map(str::to_string),
        requires_human_review: obj
            .get("requires_human_review")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}
