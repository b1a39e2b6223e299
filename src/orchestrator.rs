//! Drives processes through one orchestration step at a time.
//!
//! A step runs under a claim: evaluate the belief, detect corrections,
//! review and apply the decision, then persist state, decision record and
//! event in one store commit tied to the claim token. A step whose claim
//! expired meanwhile is discarded instead of committed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::audit::{DecisionRecord, EventRecord, EventType};
use crate::belief_manager::BeliefStateManager;
use crate::config::MarathonConfig;
use crate::corrections::{CorrectionDetector, DEFAULT_CONFIDENCE_DROP_THRESHOLD};
use crate::error::{MarathonError, Result};
use crate::reasoning::ReasoningService;
use crate::stage_data::StageDataProvider;
use crate::state_machine::{
    DecisionPolicy, PolicyVerdict, ProcessState, StageStatus, Transition,
};
use crate::store::{ProcessStore, StoreError};

/// Tunables for a [`MarathonOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub policy: DecisionPolicy,
    pub confidence_drop_threshold: f64,
    pub reasoning_timeout: Duration,
    pub initial_delay: chrono::Duration,
    pub failure_retry: chrono::Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            policy: DecisionPolicy::default(),
            confidence_drop_threshold: DEFAULT_CONFIDENCE_DROP_THRESHOLD,
            reasoning_timeout: Duration::from_secs(120),
            initial_delay: chrono::Duration::hours(1),
            failure_retry: chrono::Duration::hours(1),
        }
    }
}

impl From<&MarathonConfig> for OrchestratorSettings {
    fn from(config: &MarathonConfig) -> Self {
        Self {
            policy: config.policy(),
            confidence_drop_threshold: config.confidence_drop_threshold,
            reasoning_timeout: config.reasoning_timeout(),
            initial_delay: config.initial_delay(),
            failure_retry: config.failure_retry(),
        }
    }
}

/// What one orchestration step did to a process.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// A decision was reached and applied.
    Applied {
        transition: Transition,
        verdict: PolicyVerdict,
        fallback: bool,
        corrections: usize,
    },
    /// The reasoning service could not be reached; retried later.
    Blocked { reason: String },
    /// Another worker claimed the process first, or the claim expired
    /// before the step could commit.
    Skipped,
    /// The step errored or panicked; the process was blocked for a retry.
    Failed { reason: String },
}

/// Drives processes through the belief → correction → policy → audit flow.
pub struct MarathonOrchestrator {
    store: Arc<dyn ProcessStore>,
    stage_data: Arc<dyn StageDataProvider>,
    manager: BeliefStateManager,
    detector: CorrectionDetector,
    settings: OrchestratorSettings,
}

impl MarathonOrchestrator {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        reasoner: Arc<dyn ReasoningService>,
        stage_data: Arc<dyn StageDataProvider>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            manager: BeliefStateManager::new(
                reasoner,
                Arc::clone(&stage_data),
                settings.reasoning_timeout,
            ),
            detector: CorrectionDetector::new(settings.confidence_drop_threshold),
            store,
            stage_data,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn ProcessStore> {
        &self.store
    }

    /// Start a marathon for an application at screening.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the application is unknown; nothing is created
    pub async fn start_marathon(
        &self,
        job_id: &str,
        application_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ProcessState> {
        if !self.stage_data.application_exists(job_id, application_id).await? {
            return Err(MarathonError::NotFound {
                job_id: job_id.to_string(),
                application_id: application_id.to_string(),
            });
        }

        let state = ProcessState::new(job_id, application_id, now, self.settings.initial_delay);
        let event = EventRecord::new(
            state.id,
            EventType::MarathonStarted,
            json!({
                "job_id": job_id,
                "application_id": application_id,
                "stage": state.current_stage,
                "next_scheduled_action": state.next_scheduled_action,
            }),
            now,
        );
        self.store.create(&state, &event).await?;

        tracing::info!(
            process_id = %state.id,
            job_id,
            application_id,
            "marathon started"
        );
        Ok(state)
    }

    /// Claim a due process and run one step on it.
    ///
    /// `candidate` is the row as seen by the scheduler; the claim only
    /// succeeds if its status is still the one observed. The step runs as its
    /// own task: an error or panic releases the claim into blocked.
    pub async fn process_due(
        self: &Arc<Self>,
        candidate: &ProcessState,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome> {
        let claimed = self
            .store
            .try_claim(candidate.id, candidate.stage_status, now)
            .await?;
        let Some(claimed) = claimed else {
            tracing::debug!(process_id = %candidate.id, "claimed elsewhere, skipping");
            return Ok(StepOutcome::Skipped);
        };
        let id = claimed.id;
        let claim = claimed
            .claim_token
            .ok_or(MarathonError::NotClaimed(id))?;

        let this = Arc::clone(self);
        let reason = match tokio::spawn(async move { this.step(claimed, now).await }).await {
            Ok(Ok(outcome)) => return Ok(outcome),
            Ok(Err(e)) => {
                tracing::warn!(process_id = %id, error = %e, "orchestration step failed");
                format!("Step failed: {e}")
            }
            Err(e) => {
                tracing::error!(process_id = %id, error = %e, "orchestration step panicked");
                "Orchestration step panicked".to_string()
            }
        };

        let retry_at = now + self.settings.failure_retry;
        if self
            .release(id, claim, &reason, retry_at, EventType::ProcessingBlocked, now)
            .await?
        {
            Ok(StepOutcome::Failed { reason })
        } else {
            Ok(StepOutcome::Skipped)
        }
    }

    /// Run one orchestration step on a process this worker has claimed.
    ///
    /// # Errors
    ///
    /// - `NotClaimed` if `claimed` carries no claim token
    pub async fn step(&self, claimed: ProcessState, now: DateTime<Utc>) -> Result<StepOutcome> {
        let mut claimed = claimed;
        let claim = claimed
            .claim_token
            .take()
            .ok_or(MarathonError::NotClaimed(claimed.id))?;
        let stage = claimed.current_stage;
        let assessment = match self.manager.evaluate(&claimed).await {
            Ok(assessment) => assessment,
            Err(MarathonError::ReasoningUnreachable(e)) => {
                let reason = format!("Reasoning service unavailable at {stage}: {e}");
                let retry_at = now + self.settings.failure_retry;
                let released = self
                    .release(claimed.id, claim, &reason, retry_at, EventType::ProcessingBlocked, now)
                    .await?;
                return Ok(if released {
                    StepOutcome::Blocked { reason }
                } else {
                    StepOutcome::Skipped
                });
            }
            Err(e) => return Err(e),
        };

        let fallback = assessment.is_fallback();
        let result = assessment.into_result();
        let before = claimed.belief_state.clone();
        let found = self
            .detector
            .detect(&before, &result.updated_belief_state, stage);
        let after = CorrectionDetector::merge(&before, result.updated_belief_state.clone(), &found);

        let verdict = self.settings.policy.review(&result);
        let reason = match &verdict.adjustment {
            Some(adjustment) => format!("{} (adjusted: {adjustment})", result.reasoning),
            None => result.reasoning.clone(),
        };

        let mut next = claimed;
        next.set_belief(after.clone());
        next.correction_count = next.correction_count.saturating_add(found.len() as u32);
        let transition = self.settings.policy.apply(&mut next, &verdict, &reason, now)?;

        let decision = DecisionRecord {
            id: Uuid::new_v4(),
            process_id: next.id,
            stage,
            reported_decision: verdict.reported,
            applied_decision: verdict.applied,
            adjustment: verdict.adjustment.clone(),
            fallback,
            reasoning: result.reasoning.clone(),
            confidence: result.confidence,
            corrections: found.clone(),
            belief_before: before,
            belief_after: after,
            created_at: now,
        };
        let event = EventRecord::new(
            next.id,
            transition.event_type(),
            transition.event_data(&verdict, result.confidence),
            now,
        );
        match self.store.commit_step(claim, &next, Some(&decision), &event).await {
            Ok(()) => {}
            Err(StoreError::ClaimLost(_)) => {
                tracing::warn!(
                    process_id = %next.id,
                    stage = %stage,
                    "claim expired before commit, step discarded"
                );
                return Ok(StepOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            process_id = %next.id,
            stage = %stage,
            reported = %verdict.reported,
            applied = %verdict.applied,
            confidence = result.confidence,
            corrections = found.len(),
            fallback,
            "orchestration step applied"
        );

        Ok(StepOutcome::Applied {
            transition,
            verdict,
            fallback,
            corrections: found.len(),
        })
    }

    /// Release `claim` into blocked, due at `retry_at`. Returns false when
    /// the claim was already gone.
    async fn release(
        &self,
        id: Uuid,
        claim: Uuid,
        reason: &str,
        retry_at: DateTime<Utc>,
        event_type: EventType,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let event = EventRecord::new(
            id,
            event_type,
            json!({"reason": reason, "retry_at": retry_at}),
            now,
        );
        match self.store.release_claim(id, claim, reason, retry_at, &event).await {
            Ok(()) => {
                tracing::warn!(process_id = %id, reason, %retry_at, "process blocked");
                Ok(true)
            }
            Err(StoreError::ClaimLost(_)) => {
                tracing::debug!(process_id = %id, "claim already released");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Human unblock: an escalated or blocked process goes back to pending,
    /// due immediately.
    pub async fn resume(&self, id: Uuid, note: &str, now: DateTime<Utc>) -> Result<ProcessState> {
        let mut state = self
            .store
            .get(id)
            .await?
            .ok_or(MarathonError::ProcessNotFound(id))?;
        let previous = state.stage_status;
        if !matches!(previous, StageStatus::Escalated | StageStatus::Blocked) {
            return Err(MarathonError::NotResumable(previous));
        }

        state.stage_status = StageStatus::Pending;
        state.requires_human_review = false;
        state.escalation_reason = None;
        state.blocked_reason = None;
        state.next_scheduled_action = Some(now);
        state.updated_at = now;

        let event = EventRecord::new(
            id,
            EventType::MarathonResumed,
            json!({"previous_status": previous, "stage": state.current_stage, "note": note}),
            now,
        );
        self.store.replace_if(&state, previous, &event).await?;
        tracing::info!(process_id = %id, previous = %previous, "marathon resumed");
        Ok(state)
    }

    /// Release claims held longer than `claim_timeout`, making the processes
    /// due again right away. Returns how many were released.
    pub async fn recover_stale_claims(
        &self,
        claim_timeout: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut recovered = 0;
        for state in self.store.stale_claims(now - claim_timeout).await? {
            let Some(claim) = state.claim_token else {
                tracing::warn!(process_id = %state.id, "in-progress process without a claim token");
                continue;
            };
            let reason = format!(
                "Claim from {} expired before the step finished",
                state.updated_at
            );
            // A step that committed between the scan and here keeps its result.
            if self
                .release(state.id, claim, &reason, now, EventType::ClaimExpired, now)
                .await?
            {
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    pub async fn history(&self, id: Uuid) -> Result<(Vec<DecisionRecord>, Vec<EventRecord>)> {
        let decisions = self.store.decisions_for(id).await?;
        let events = self.store.events_for(id).await?;
        Ok((decisions, events))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use serde_json::Value;

    use super::*;
    use crate::reasoning::{ReasoningContext, ReasoningError};
    use crate::state_machine::{CorrectionKind, DecisionType, Stage};
    use crate::store::MemoryStore;

    pub(crate) fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    /// Replies per application id; unknown applications get `default`.
    struct ScriptedReasoner {
        replies: Mutex<HashMap<String, Result<String, String>>>,
    }

    impl ScriptedReasoner {
        fn new() -> Self {
            Self {
                replies: Mutex::new(HashMap::new()),
            }
        }

        fn reply(&self, app: &str, body: Value) {
            self.replies
                .lock()
                .unwrap()
                .insert(app.to_string(), Ok(body.to_string()));
        }

        fn unreachable(&self, app: &str) {
            self.replies
                .lock()
                .unwrap()
                .insert(app.to_string(), Err("connection refused".into()));
        }
    }

    #[async_trait]
    impl ReasoningService for ScriptedReasoner {
        async fn reason(
            &self,
            context: &ReasoningContext,
        ) -> std::result::Result<String, ReasoningError> {
            match self.replies.lock().unwrap().get(&context.application_id) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(e)) => Err(ReasoningError::Unreachable(e.clone())),
                None => Ok("not json".into()),
            }
        }
    }

    struct KnownApplications;

    #[async_trait]
    impl StageDataProvider for KnownApplications {
        async fn application_exists(&self, _job: &str, app: &str) -> Result<bool> {
            Ok(app != "ghost")
        }

        async fn fetch(&self, _process: &ProcessState, stage: Stage) -> Result<Value> {
            Ok(json!({"stage": stage}))
        }
    }

    fn on_store(store: Arc<MemoryStore>, reasoner: Arc<ScriptedReasoner>) -> Arc<MarathonOrchestrator> {
        Arc::new(MarathonOrchestrator::new(
            store,
            reasoner,
            Arc::new(KnownApplications),
            OrchestratorSettings::default(),
        ))
    }

    fn orchestrator(reasoner: Arc<ScriptedReasoner>) -> (Arc<MemoryStore>, Arc<MarathonOrchestrator>) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), on_store(store, reasoner))
    }

    async fn started_at(orch: &MarathonOrchestrator, app: &str, stage: Stage) -> ProcessState {
        let mut p = orch.start_marathon("job-1", app, now()).await.unwrap();
        if stage != Stage::Screening {
            p.current_stage = stage;
            let event = EventRecord::new(p.id, EventType::MarathonResumed, json!({}), now());
            orch.store.replace_if(&p, StageStatus::Pending, &event).await.unwrap();
        }
        p
    }

    fn due_time() -> DateTime<Utc> {
        now() + ChronoDuration::hours(2)
    }

    #[tokio::test]
    async fn start_creates_pending_screening_process() {
        let (store, orch) = orchestrator(Arc::new(ScriptedReasoner::new()));
        let p = orch.start_marathon("job-1", "app-a", now()).await.unwrap();

        assert_eq!(p.current_stage, Stage::Screening);
        assert_eq!(p.stage_status, StageStatus::Pending);
        assert_eq!(p.decision_confidence, 0.5);
        assert_eq!(p.next_scheduled_action, Some(now() + ChronoDuration::hours(1)));

        let events = store.events_for(p.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::MarathonStarted);
    }

    #[tokio::test]
    async fn start_for_unknown_application_creates_nothing() {
        let (store, orch) = orchestrator(Arc::new(ScriptedReasoner::new()));
        let err = orch.start_marathon("job-1", "ghost", now()).await.unwrap_err();
        assert!(matches!(err, MarathonError::NotFound { .. }));
        assert!(store.active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn confident_advance_moves_to_phone_screen() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.reply(
            "app-a",
            json!({"decision": "advance", "confidence": 0.85, "reasoning": "strong resume"}),
        );
        let (store, orch) = orchestrator(reasoner);
        let p = started_at(&orch, "app-a", Stage::Screening).await;

        let outcome = orch.process_due(&p, due_time()).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Applied { .. }));

        let stored = store.get(p.id).await.unwrap().unwrap();
        assert_eq!(stored.current_stage, Stage::PhoneScreen);
        assert_eq!(stored.stage_status, StageStatus::Pending);
        assert_eq!(
            stored.next_scheduled_action,
            Some(due_time() + ChronoDuration::hours(24))
        );
        let events = store.events_for(p.id).await.unwrap();
        assert_eq!(events.last().unwrap().event_type, EventType::CandidateAdvanced);
        assert_eq!(store.decisions_for(p.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn under_confident_advance_is_escalated_and_recorded() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.reply(
            "app-b",
            json!({"decision": "advance", "confidence": 0.55, "reasoning": "mixed call"}),
        );
        let (store, orch) = orchestrator(reasoner);
        let p = started_at(&orch, "app-b", Stage::PhoneScreen).await;

        orch.process_due(&p, due_time()).await.unwrap();

        let stored = store.get(p.id).await.unwrap().unwrap();
        assert_eq!(stored.stage_status, StageStatus::Escalated);
        assert!(stored.requires_human_review);
        assert_eq!(stored.next_scheduled_action, None);
        assert!(stored.escalation_reason.unwrap().contains("mixed call"));

        let decisions = store.decisions_for(p.id).await.unwrap();
        assert_eq!(decisions[0].reported_decision, DecisionType::Advance);
        assert_eq!(decisions[0].applied_decision, DecisionType::Escalate);
        assert!(decisions[0].adjustment.is_some());

        let review = store.escalated().await.unwrap();
        assert_eq!(review.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_service_blocks_without_moving_stage() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.unreachable("app-c");
        let (store, orch) = orchestrator(reasoner);
        let p = started_at(&orch, "app-c", Stage::Assessment).await;

        let outcome = orch.process_due(&p, due_time()).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Blocked { .. }));

        let stored = store.get(p.id).await.unwrap().unwrap();
        assert_eq!(stored.stage_status, StageStatus::Blocked);
        assert_eq!(stored.current_stage, Stage::Assessment);
        assert!(!stored.blocked_reason.unwrap().is_empty());
        assert!(stored.next_scheduled_action.unwrap() > due_time());
        assert!(store.decisions_for(p.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_reply_escalates_with_fallback_record() {
        let (store, orch) = orchestrator(Arc::new(ScriptedReasoner::new()));
        let p = started_at(&orch, "app-x", Stage::Screening).await;

        let outcome = orch.process_due(&p, due_time()).await.unwrap();
        let StepOutcome::Applied { fallback, .. } = outcome else {
            panic!("expected an applied step");
        };
        assert!(fallback);

        let stored = store.get(p.id).await.unwrap().unwrap();
        assert_eq!(stored.stage_status, StageStatus::Escalated);
        let decision = &store.decisions_for(p.id).await.unwrap()[0];
        assert!(decision.fallback);
        assert_eq!(decision.confidence, 0.0);
    }

    #[tokio::test]
    async fn explicit_and_silent_corrections_are_counted() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.reply(
            "app-e",
            json!({
                "decision": "hold",
                "confidence": 0.6,
                "reasoning": "contradictions found",
                "updated_belief_state": {
                    "decision_confidence": 0.6,
                    "self_corrections": [
                        {"stage": "phone_screen", "original_belief": "remote ok", "correction": "needs relocation", "impact": "logistics"},
                        {"stage": "phone_screen", "original_belief": "senior", "correction": "mid-level", "impact": "level down"}
                    ]
                }
            }),
        );
        let (store, orch) = orchestrator(reasoner);
        let mut p = started_at(&orch, "app-e", Stage::Screening).await;
        p.belief_state.decision_confidence = 0.9;
        p.decision_confidence = 0.9;
        let event = EventRecord::new(p.id, EventType::MarathonResumed, json!({}), now());
        store.replace_if(&p, StageStatus::Pending, &event).await.unwrap();

        let outcome = orch.process_due(&p, due_time()).await.unwrap();
        let StepOutcome::Applied { corrections, .. } = outcome else {
            panic!("expected an applied step");
        };
        assert_eq!(corrections, 3);

        let stored = store.get(p.id).await.unwrap().unwrap();
        assert_eq!(stored.correction_count, 3);
        assert_eq!(stored.belief_state.self_corrections.len(), 3);
        assert_eq!(
            stored.belief_state.self_corrections[2].kind,
            CorrectionKind::ConfidenceDrop
        );
        assert_eq!(stored.decision_confidence, 0.6);
    }

    #[tokio::test]
    async fn lost_claim_is_skipped() {
        let (store, orch) = orchestrator(Arc::new(ScriptedReasoner::new()));
        let p = started_at(&orch, "app-a", Stage::Screening).await;
        store.try_claim(p.id, StageStatus::Pending, due_time()).await.unwrap();

        let outcome = orch.process_due(&p, due_time()).await.unwrap();
        assert_eq!(outcome, StepOutcome::Skipped);
    }

    #[tokio::test]
    async fn resume_returns_escalated_process_to_pending() {
        let (store, orch) = orchestrator(Arc::new(ScriptedReasoner::new()));
        let p = started_at(&orch, "app-x", Stage::Screening).await;
        orch.process_due(&p, due_time()).await.unwrap();

        let resumed = orch.resume(p.id, "reviewed by recruiter", due_time()).await.unwrap();
        assert_eq!(resumed.stage_status, StageStatus::Pending);
        assert!(!resumed.requires_human_review);
        assert_eq!(resumed.next_scheduled_action, Some(due_time()));

        let events = store.events_for(p.id).await.unwrap();
        assert_eq!(events.last().unwrap().event_type, EventType::MarathonResumed);
        assert!(orch.resume(p.id, "again", due_time()).await.is_err());
    }

    #[tokio::test]
    async fn stale_claims_are_released() {
        let (store, orch) = orchestrator(Arc::new(ScriptedReasoner::new()));
        let p = started_at(&orch, "app-a", Stage::Screening).await;
        store.try_claim(p.id, StageStatus::Pending, due_time()).await.unwrap();

        let later = due_time() + ChronoDuration::minutes(30);
        let released = orch
            .recover_stale_claims(ChronoDuration::minutes(10), later)
            .await
            .unwrap();
        assert_eq!(released, 1);

        let stored = store.get(p.id).await.unwrap().unwrap();
        assert_eq!(stored.stage_status, StageStatus::Blocked);
        assert_eq!(stored.next_scheduled_action, Some(later));
        assert_eq!(stored.claim_token, None);
        assert!(stored.invariant_violations().is_empty());
    }

    #[tokio::test]
    async fn expired_claim_cannot_commit_over_a_new_claim() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.reply(
            "app-a",
            json!({"decision": "advance", "confidence": 0.95, "reasoning": "strong"}),
        );
        let (store, orch) = orchestrator(reasoner);
        let p = started_at(&orch, "app-a", Stage::Screening).await;

        let first = store
            .try_claim(p.id, StageStatus::Pending, due_time())
            .await
            .unwrap()
            .unwrap();
        let later = due_time() + ChronoDuration::minutes(30);
        let released = orch
            .recover_stale_claims(ChronoDuration::minutes(10), later)
            .await
            .unwrap();
        assert_eq!(released, 1);
        let second = store
            .try_claim(p.id, StageStatus::Blocked, later)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(first.claim_token, second.claim_token);

        // The first holder finishes its step after losing the claim.
        let outcome = orch.step(first, later).await.unwrap();
        assert_eq!(outcome, StepOutcome::Skipped);

        let stored = store.get(p.id).await.unwrap().unwrap();
        assert_eq!(stored.stage_status, StageStatus::InProgress);
        assert_eq!(stored.claim_token, second.claim_token);
        assert_eq!(stored.current_stage, Stage::Screening);
        assert!(store.decisions_for(p.id).await.unwrap().is_empty());
        let events: Vec<_> = store
            .events_for(p.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(events, vec![EventType::MarathonStarted, EventType::ClaimExpired]);

        let outcome = orch.step(second, later).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Applied { .. }));
        let stored = store.get(p.id).await.unwrap().unwrap();
        assert_eq!(stored.current_stage, Stage::PhoneScreen);
        assert_eq!(stored.claim_token, None);
        assert_eq!(store.decisions_for(p.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn step_without_a_claim_is_refused() {
        let (store, orch) = orchestrator(Arc::new(ScriptedReasoner::new()));
        let p = started_at(&orch, "app-a", Stage::Screening).await;

        let err = orch.step(p.clone(), due_time()).await.unwrap_err();
        assert!(matches!(err, MarathonError::NotClaimed(id) if id == p.id));
        assert_eq!(
            store.get(p.id).await.unwrap().unwrap().stage_status,
            StageStatus::Pending
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_orchestrators_commit_one_step() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.reply(
            "app-a",
            json!({"decision": "advance", "confidence": 0.95, "reasoning": "strong"}),
        );
        let (store, one) = orchestrator(reasoner.clone());
        let other = on_store(store.clone(), reasoner);
        let p = started_at(&one, "app-a", Stage::Screening).await;

        let (a, b) = tokio::join!(
            one.process_due(&p, due_time()),
            other.process_due(&p, due_time())
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let applied = outcomes
            .iter()
            .filter(|o| matches!(o, StepOutcome::Applied { .. }))
            .count();
        let skipped = outcomes
            .iter()
            .filter(|o| **o == StepOutcome::Skipped)
            .count();
        assert_eq!((applied, skipped), (1, 1));

        let stored = store.get(p.id).await.unwrap().unwrap();
        assert_eq!(stored.current_stage, Stage::PhoneScreen);
        assert_eq!(stored.stage_status, StageStatus::Pending);
        assert_eq!(store.decisions_for(p.id).await.unwrap().len(), 1);
        // Start plus the single committed step.
        assert_eq!(store.events_for(p.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn full_marathon_reaches_completed() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        reasoner.reply(
            "app-a",
            json!({"decision": "advance", "confidence": 0.95, "reasoning": "excellent"}),
        );
        let (store, orch) = orchestrator(reasoner);
        let p = started_at(&orch, "app-a", Stage::Screening).await;

        let mut at = due_time();
        let mut stages = Vec::new();
        for _ in 0..4 {
            let current = store.get(p.id).await.unwrap().unwrap();
            stages.push(current.current_stage);
            orch.process_due(&current, at).await.unwrap();
            at += ChronoDuration::hours(25);
        }

        let stored = store.get(p.id).await.unwrap().unwrap();
        assert_eq!(stages, Stage::ALL.to_vec());
        assert_eq!(stored.stage_status, StageStatus::Completed);
        assert_eq!(stored.next_scheduled_action, None);
        assert_eq!(store.decisions_for(p.id).await.unwrap().len(), 4);
        // One start event plus one per step.
        assert_eq!(store.events_for(p.id).await.unwrap().len(), 5);
    }
}
