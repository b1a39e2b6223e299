//! Persistence port for process states and their audit trail.
//!
//! The orchestrator never mutates shared state in process memory: every
//! coordination point is a conditional update on a [`ProcessStore`].

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{DecisionRecord, EventRecord};
use crate::state_machine::{ProcessState, StageStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("process {0} not found")]
    NotFound(Uuid),

    #[error("process {0} already exists")]
    Duplicate(Uuid),

    #[error("process {id} is {found}, expected {expected}")]
    Conflict {
        id: Uuid,
        expected: StageStatus,
        found: StageStatus,
    },

    /// The caller's claim expired and the process moved on without it.
    #[error("claim on process {0} is no longer held")]
    ClaimLost(Uuid),

    #[error("snapshot IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable storage for process states, decision records and events.
///
/// Every method that writes more than one record must do so atomically.
#[async_trait]
pub trait ProcessStore: Send + Sync {
    /// Insert a new process together with its start event.
    ///
    /// # Errors
    ///
    /// - `Duplicate` if a process with the same id exists
    async fn create(&self, state: &ProcessState, event: &EventRecord) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<ProcessState>, StoreError>;

    /// Atomically move `id` from `expected` to in_progress under a fresh
    /// claim token.
    ///
    /// Returns the claimed state (carrying the token), or `None` if the
    /// process is no longer in `expected` or no longer due at `now` (another
    /// worker got there first). At most one concurrent caller succeeds for
    /// the same observed status.
    async fn try_claim(
        &self,
        id: Uuid,
        expected: StageStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<ProcessState>, StoreError>;

    /// Persist the outcome of one claimed orchestration step: the updated
    /// state, its decision record (if a decision was reached) and its event.
    /// The claim is released.
    ///
    /// # Errors
    ///
    /// - `ClaimLost` if the stored process no longer holds `claim`
    async fn commit_step(
        &self,
        claim: Uuid,
        state: &ProcessState,
        decision: Option<&DecisionRecord>,
        event: &EventRecord,
    ) -> Result<(), StoreError>;

    /// Release `claim` by moving the process to blocked, due at `retry_at`.
    /// Used when a step failed or its claim expired.
    ///
    /// # Errors
    ///
    /// - `ClaimLost` if the stored process no longer holds `claim`
    async fn release_claim(
        &self,
        id: Uuid,
        claim: Uuid,
        reason: &str,
        retry_at: DateTime<Utc>,
        event: &EventRecord,
    ) -> Result<(), StoreError>;

    /// Replace a process that is currently in `expected` status. Claimed
    /// processes are only changed through their claim, so `expected` must not
    /// be in_progress.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the stored status differs from `expected`, or
    ///   `expected` is in_progress
    async fn replace_if(
        &self,
        state: &ProcessState,
        expected: StageStatus,
        event: &EventRecord,
    ) -> Result<(), StoreError>;

    /// Schedulable processes (pending or blocked) due at `now`, earliest first.
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ProcessState>, StoreError>;

    /// In-progress processes last touched before `before`.
    async fn stale_claims(&self, before: DateTime<Utc>) -> Result<Vec<ProcessState>, StoreError>;

    /// Escalated processes awaiting a human.
    async fn escalated(&self) -> Result<Vec<ProcessState>, StoreError>;

    /// Pending, in-progress and blocked processes ordered by next action.
    async fn active(&self) -> Result<Vec<ProcessState>, StoreError>;

    /// Decision records for one process, oldest first.
    async fn decisions_for(&self, id: Uuid) -> Result<Vec<DecisionRecord>, StoreError>;

    /// Event records for one process, oldest first.
    async fn events_for(&self, id: Uuid) -> Result<Vec<EventRecord>, StoreError>;
}
