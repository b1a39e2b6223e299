//! Append-only audit records.
//!
//! One [`DecisionRecord`] is written per orchestration step that reached a
//! decision, and one [`EventRecord`] per lifecycle transition. Both are
//! immutable once handed to the store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::state_machine::{BeliefState, DecisionType, SelfCorrection, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MarathonStarted,
    CandidateAdvanced,
    CandidateRejected,
    EscalatedToHuman,
    HeldForMoreData,
    /// The step failed before a decision could be applied.
    ProcessingBlocked,
    /// A human released an escalated or blocked process.
    MarathonResumed,
    /// An in-progress claim outlived the claim timeout.
    ClaimExpired,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::MarathonStarted => "marathon_started",
            EventType::CandidateAdvanced => "candidate_advanced",
            EventType::CandidateRejected => "candidate_rejected",
            EventType::EscalatedToHuman => "escalated_to_human",
            EventType::HeldForMoreData => "held_for_more_data",
            EventType::ProcessingBlocked => "processing_blocked",
            EventType::MarathonResumed => "marathon_resumed",
            EventType::ClaimExpired => "claim_expired",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub process_id: Uuid,
    pub event_type: EventType,
    pub event_data: Value,
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(
        process_id: Uuid,
        event_type: EventType,
        event_data: Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            process_id,
            event_type,
            event_data,
            created_at,
        }
    }
}

/// The outcome of one orchestration step, with before/after snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub process_id: Uuid,
    pub stage: Stage,
    /// What the reasoning service asked for.
    pub reported_decision: DecisionType,
    /// What the policy actually applied.
    pub applied_decision: DecisionType,
    /// Why `applied_decision` differs from `reported_decision`, if it does.
    pub adjustment: Option<String>,
    /// The result came from the safe fallback, not a parsed response.
    pub fallback: bool,
    pub reasoning: String,
    pub confidence: f64,
    pub corrections: Vec<SelfCorrection>,
    pub belief_before: BeliefState,
    pub belief_after: BeliefState,
    pub created_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn was_adjusted(&self) -> bool {
        self.reported_decision != self.applied_decision
    }
}
