//! Persisted per-process record and its scheduling helpers.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::belief::{self, BeliefState, clamp_confidence};
use super::stage::{DecisionType, Stage, StageStatus};

/// One candidate/job pairing under autonomous management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessState {
    pub id: Uuid,
    pub job_id: String,
    pub application_id: String,
    #[serde(with = "belief::versioned")]
    pub belief_state: BeliefState,
    pub decision_confidence: f64,
    pub current_stage: Stage,
    pub stage_status: StageStatus,
    pub correction_count: u32,
    pub requires_human_review: bool,
    pub escalation_reason: Option<String>,
    pub blocked_reason: Option<String>,
    pub next_scheduled_action: Option<DateTime<Utc>>,
    pub last_agent_action: Option<DecisionType>,
    pub last_agent_reasoning: Option<String>,
    /// Owner token of the current claim; set only while in_progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_token: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessState {
    /// A new marathon at screening, due after `initial_delay`.
    pub fn new(
        job_id: impl Into<String>,
        application_id: impl Into<String>,
        now: DateTime<Utc>,
        initial_delay: Duration,
    ) -> Self {
        let belief_state = BeliefState::initial();
        Self {
            id: Uuid::new_v4(),
            job_id: job_id.into(),
            application_id: application_id.into(),
            decision_confidence: belief_state.decision_confidence,
            belief_state,
            current_stage: Stage::Screening,
            stage_status: StageStatus::Pending,
            correction_count: 0,
            requires_human_review: false,
            escalation_reason: None,
            blocked_reason: None,
            next_scheduled_action: Some(now + initial_delay),
            last_agent_action: None,
            last_agent_reasoning: None,
            claim_token: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage_status.is_terminal()
    }

    /// Due for a scheduler pass at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.stage_status.is_schedulable()
            && self.next_scheduled_action.is_some_and(|at| at <= now)
    }

    /// Replaces the belief state, keeping the mirrored confidence in sync.
    pub fn set_belief(&mut self, belief: BeliefState) {
        self.decision_confidence = clamp_confidence(belief.decision_confidence);
        self.belief_state = belief;
    }

    /// Moves the process to in_progress under a fresh claim token.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Uuid {
        let token = Uuid::new_v4();
        self.stage_status = StageStatus::InProgress;
        self.claim_token = Some(token);
        self.updated_at = now;
        token
    }

    /// Moves the process to blocked, retrying at `retry_at`. Any claim is
    /// released.
    pub fn block(&mut self, reason: impl Into<String>, retry_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.stage_status = StageStatus::Blocked;
        self.claim_token = None;
        self.blocked_reason = Some(reason.into());
        self.next_scheduled_action = Some(retry_at);
        self.updated_at = now;
    }

    /// Lists every broken data-model invariant; empty when the state is sound.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        if !(0.0..=1.0).contains(&self.decision_confidence) {
            violations.push(format!(
                "decision_confidence {} outside [0, 1]",
                self.decision_confidence
            ));
        }
        match self.stage_status {
            StageStatus::Pending | StageStatus::Blocked if self.next_scheduled_action.is_none() => {
                violations.push(format!(
                    "{} process has no next_scheduled_action",
                    self.stage_status
                ));
            }
            StageStatus::Escalated | StageStatus::Completed
                if self.next_scheduled_action.is_some() =>
            {
                violations.push(format!(
                    "terminal {} process still scheduled",
                    self.stage_status
                ));
            }
            _ => {}
        }
        if self.claim_token.is_some() != (self.stage_status == StageStatus::InProgress) {
            violations.push(format!(
                "claim token present: {}, status {}",
                self.claim_token.is_some(),
                self.stage_status
            ));
        }
        if self.stage_status == StageStatus::Blocked && self.blocked_reason.is_none() {
            violations.push("blocked process has no blocked_reason".to_string());
        }
        if self.stage_status == StageStatus::Escalated && self.escalation_reason.is_none() {
            violations.push("escalated process has no escalation_reason".to_string());
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn new_process_defaults() {
        let p = ProcessState::new("job-1", "app-1", now(), Duration::hours(1));
        assert_eq!(p.current_stage, Stage::Screening);
        assert_eq!(p.stage_status, StageStatus::Pending);
        assert_eq!(p.decision_confidence, 0.5);
        assert_eq!(p.correction_count, 0);
        assert_eq!(p.next_scheduled_action, Some(now() + Duration::hours(1)));
        assert!(p.invariant_violations().is_empty());
    }

    #[test]
    fn due_only_when_schedulable_and_time_reached() {
        let mut p = ProcessState::new("job-1", "app-1", now(), Duration::hours(1));
        assert!(!p.is_due(now()));
        assert!(p.is_due(now() + Duration::hours(1)));

        p.stage_status = StageStatus::InProgress;
        assert!(!p.is_due(now() + Duration::hours(2)));
    }

    #[test]
    fn block_sets_reason_and_retry() {
        let mut p = ProcessState::new("job-1", "app-1", now(), Duration::hours(1));
        let retry = now() + Duration::minutes(60);
        p.block("reasoning service timed out", retry, now());
        assert_eq!(p.stage_status, StageStatus::Blocked);
        assert_eq!(p.next_scheduled_action, Some(retry));
        assert!(p.invariant_violations().is_empty());
    }

    #[test]
    fn claim_issues_token_and_block_releases_it() {
        let mut p = ProcessState::new("job-1", "app-1", now(), Duration::hours(1));
        let first = p.claim(now());
        assert_eq!(p.stage_status, StageStatus::InProgress);
        assert_eq!(p.claim_token, Some(first));
        assert!(p.invariant_violations().is_empty());

        p.block("worker crashed", now(), now());
        assert_eq!(p.claim_token, None);
        let second = p.claim(now());
        assert_ne!(first, second);
    }

    #[test]
    fn invariant_violations_flag_unclaimed_in_progress() {
        let mut p = ProcessState::new("job-1", "app-1", now(), Duration::hours(1));
        p.stage_status = StageStatus::InProgress;
        assert_eq!(p.invariant_violations().len(), 1);
    }

    #[test]
    fn invariant_violations_flag_scheduled_terminal_state() {
        let mut p = ProcessState::new("job-1", "app-1", now(), Duration::hours(1));
        p.stage_status = StageStatus::Completed;
        assert_eq!(p.invariant_violations().len(), 1);
    }

    #[test]
    fn process_serialization_roundtrip_uses_envelope() {
        let p = ProcessState::new("job-1", "app-1", now(), Duration::hours(1));
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["belief_state"]["schema_version"], 1);
        let parsed: ProcessState = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, p);
    }
}
