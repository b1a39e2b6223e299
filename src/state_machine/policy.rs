//! Autonomy policy: which decisions the orchestrator may apply on its own,
//! and how an applied decision moves a process.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};

use super::decision::DecisionResult;
use super::process::ProcessState;
use super::stage::{DecisionType, Stage, StageStatus};
use crate::audit::EventType;
use crate::error::{MarathonError, Result};

/// Confidence below which advance/reject are never applied autonomously.
pub const DEFAULT_AUTONOMY_FLOOR: f64 = 0.8;

/// The reported decision next to the one the policy will apply.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyVerdict {
    pub reported: DecisionType,
    pub applied: DecisionType,
    pub adjustment: Option<String>,
}

/// The result of applying a verdict to a process.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Moved to the next stage.
    Advanced { from: Stage, to: Stage },
    /// Advanced past the final stage; nothing left to decide.
    Completed { stage: Stage },
    Rejected { stage: Stage },
    Escalated { stage: Stage },
    /// Same stage retried later with fresh data.
    Held { stage: Stage, retry_at: DateTime<Utc> },
}

impl Transition {
    pub fn event_type(&self) -> EventType {
        match self {
            Transition::Advanced { .. } | Transition::Completed { .. } => {
                EventType::CandidateAdvanced
            }
            Transition::Rejected { .. } => EventType::CandidateRejected,
            Transition::Escalated { .. } => EventType::EscalatedToHuman,
            Transition::Held { .. } => EventType::HeldForMoreData,
        }
    }

    /// Payload stored with the transition's event record.
    pub fn event_data(&self, verdict: &PolicyVerdict, confidence: f64) -> Value {
        let mut data = json!({
            "reported_decision": verdict.reported,
            "applied_decision": verdict.applied,
            "confidence": confidence,
        });
        let extra = match self {
            Transition::Advanced { from, to } => json!({"from_stage": from, "to_stage": to, "completed": false}),
            Transition::Completed { stage } => json!({"from_stage": stage, "completed": true}),
            Transition::Rejected { stage } | Transition::Escalated { stage } => json!({"stage": stage}),
            Transition::Held { stage, retry_at } => json!({"stage": stage, "retry_at": retry_at}),
        };
        if let (Some(target), Value::Object(extra)) = (data.as_object_mut(), extra) {
            target.extend(extra);
        }
        if let Some(adjustment) = &verdict.adjustment {
            data["adjustment"] = json!(adjustment);
        }
        data
    }
}

/// Validates reported decisions and drives a process through its stages.
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    pub autonomy_floor: f64,
    pub advance_delay: Duration,
    pub hold_delay: Duration,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            autonomy_floor: DEFAULT_AUTONOMY_FLOOR,
            advance_delay: Duration::hours(24),
            hold_delay: Duration::hours(72),
        }
    }
}

impl DecisionPolicy {
    /// Decide what will actually be applied for a reported result.
    ///
    /// Irreversible decisions (advance, reject) are downgraded to escalate
    /// when confidence is under the autonomy floor or the reasoning service
    /// itself asked for a human.
    pub fn review(&self, result: &DecisionResult) -> PolicyVerdict {
        let reported = result.decision;
        let adjustment = if !reported.is_irreversible() {
            None
        } else if result.confidence < self.autonomy_floor {
            Some(format!(
                "{reported} with confidence {:.2} is below the autonomy floor {:.2}",
                result.confidence, self.autonomy_floor
            ))
        } else if result.requires_human_review {
            Some(format!("{reported} reported together with a request for human review"))
        } else {
            None
        };

        PolicyVerdict {
            reported,
            applied: if adjustment.is_some() {
                DecisionType::Escalate
            } else {
                reported
            },
            adjustment,
        }
    }

    /// Apply a verdict to the process.
    ///
    /// - advance: next stage and pending, due after `advance_delay`; from the
    ///   final stage the process is completed instead.
    /// - reject: completed.
    /// - escalate: escalated with no scheduled action.
    /// - hold: blocked on the same stage, due after `hold_delay`.
    ///
    /// Terminal processes cannot be transitioned.
    pub fn apply(
        &self,
        process: &mut ProcessState,
        verdict: &PolicyVerdict,
        reasoning: &str,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        if process.is_terminal() {
            return Err(MarathonError::InvalidTransition {
                status: process.stage_status,
                decision: verdict.applied,
            });
        }

        let stage = process.current_stage;
        let transition = match verdict.applied {
            DecisionType::Advance => match stage.next() {
                Some(next) => {
                    process.current_stage = next;
                    process.stage_status = StageStatus::Pending;
                    process.next_scheduled_action = Some(now + self.advance_delay);
                    Transition::Advanced { from: stage, to: next }
                }
                None => {
                    process.stage_status = StageStatus::Completed;
                    process.next_scheduled_action = None;
                    Transition::Completed { stage }
                }
            },
            DecisionType::Reject => {
                process.stage_status = StageStatus::Completed;
                process.next_scheduled_action = None;
                Transition::Rejected { stage }
            }
            DecisionType::Escalate => {
                process.stage_status = StageStatus::Escalated;
                process.requires_human_review = true;
                process.escalation_reason = Some(reasoning.to_string());
                process.next_scheduled_action = None;
                Transition::Escalated { stage }
            }
            DecisionType::Hold => {
                let retry_at = now + self.hold_delay;
                process.stage_status = StageStatus::Blocked;
                process.blocked_reason = Some(reasoning.to_string());
                process.next_scheduled_action = Some(retry_at);
                Transition::Held { stage, retry_at }
            }
        };

        if verdict.applied != DecisionType::Hold {
            process.blocked_reason = None;
        }
        process.last_agent_action = Some(verdict.applied);
        process.last_agent_reasoning = Some(reasoning.to_string());
        process.updated_at = now;

        Ok(transition)
    }
}
