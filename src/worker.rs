//! Scheduler loop: periodically picks due processes and runs one
//! orchestration step on each.
//!
//! Items of a batch run as independent tasks. A step that errors or panics
//! leaves its process blocked for a later retry and never stops the rest of
//! the batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::MarathonConfig;
use crate::error::Result;
use crate::orchestrator::{MarathonOrchestrator, StepOutcome};
use crate::state_machine::Transition;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub claim_timeout: chrono::Duration,
}

impl From<&MarathonConfig> for WorkerSettings {
    fn from(config: &MarathonConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            batch_size: config.batch_size,
            claim_timeout: config.claim_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Advanced,
    Completed,
    Rejected,
    Escalated,
    Held,
    /// Reasoning service unreachable; retried later.
    Blocked,
    /// Claimed by another worker first, or the claim expired mid-step.
    Skipped,
    /// The step errored or panicked; the process was blocked.
    Failed,
}

impl From<&StepOutcome> for ItemOutcome {
    fn from(outcome: &StepOutcome) -> Self {
        match outcome {
            StepOutcome::Applied { transition, .. } => match transition {
                Transition::Advanced { .. } => ItemOutcome::Advanced,
                Transition::Completed { .. } => ItemOutcome::Completed,
                Transition::Rejected { .. } => ItemOutcome::Rejected,
                Transition::Escalated { .. } => ItemOutcome::Escalated,
                Transition::Held { .. } => ItemOutcome::Held,
            },
            StepOutcome::Blocked { .. } => ItemOutcome::Blocked,
            StepOutcome::Skipped => ItemOutcome::Skipped,
            StepOutcome::Failed { .. } => ItemOutcome::Failed,
        }
    }
}

/// Tally of one scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub recovered: usize,
    pub picked: usize,
    pub advanced: usize,
    pub completed: usize,
    pub rejected: usize,
    pub escalated: usize,
    pub held: usize,
    pub blocked: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: ItemOutcome) {
        let slot = match outcome {
            ItemOutcome::Advanced => &mut self.advanced,
            ItemOutcome::Completed => &mut self.completed,
            ItemOutcome::Rejected => &mut self.rejected,
            ItemOutcome::Escalated => &mut self.escalated,
            ItemOutcome::Held => &mut self.held,
            ItemOutcome::Blocked => &mut self.blocked,
            ItemOutcome::Skipped => &mut self.skipped,
            ItemOutcome::Failed => &mut self.failed,
        };
        *slot += 1;
    }
}

pub struct Worker {
    orchestrator: Arc<MarathonOrchestrator>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(orchestrator: Arc<MarathonOrchestrator>, settings: WorkerSettings) -> Self {
        Self {
            orchestrator,
            settings,
        }
    }

    /// Poll until `shutdown` flips to true. A batch in flight is finished
    /// before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            batch_size = self.settings.batch_size,
            "worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_batch(Utc::now()).await {
                        Ok(report) if report.picked > 0 || report.recovered > 0 => {
                            info!(?report, "batch finished");
                        }
                        Ok(_) => debug!("nothing due"),
                        // The store itself failed; try again next tick.
                        Err(e) => error!(error = %e, "batch aborted"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("worker stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One scheduler pass at `now`: release stale claims, then step every
    /// due process concurrently.
    pub async fn run_batch(&self, now: DateTime<Utc>) -> Result<BatchReport> {
        let mut report = BatchReport {
            recovered: self
                .orchestrator
                .recover_stale_claims(self.settings.claim_timeout, now)
                .await?,
            ..Default::default()
        };

        let due = self
            .orchestrator
            .store()
            .due(now, self.settings.batch_size)
            .await?;
        report.picked = due.len();

        let mut handles = Vec::with_capacity(due.len());
        for candidate in due {
            let orchestrator = Arc::clone(&self.orchestrator);
            let id = candidate.id;
            let handle = tokio::spawn(async move {
                match orchestrator.process_due(&candidate, now).await {
                    Ok(outcome) => ItemOutcome::from(&outcome),
                    // Claiming or releasing failed in the store; the claim,
                    // if taken, is recovered once it goes stale.
                    Err(e) => {
                        warn!(process_id = %id, error = %e, "could not process due item");
                        ItemOutcome::Failed
                    }
                }
            });
            handles.push((id, handle));
        }

        for (id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(process_id = %id, error = %e, "worker task panicked");
                    ItemOutcome::Failed
                }
            };
            report.record(outcome);
        }

        Ok(report)
    }
}
