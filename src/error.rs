//! Error taxonomy for the orchestrator.
//!
//! [`MarathonError`] is what orchestration operations return. Port-specific
//! failures keep their own enums ([`StoreError`], [`ReasoningError`]) and are
//! wrapped here.

use thiserror::Error;
use uuid::Uuid;

use crate::reasoning::ReasoningError;
use crate::state_machine::{DecisionType, StageStatus};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum MarathonError {
    #[error("Application {application_id} for job {job_id} not found")]
    NotFound {
        job_id: String,
        application_id: String,
    },

    #[error("Process not found: {0}")]
    ProcessNotFound(Uuid),

    #[error("Reasoning service unreachable: {0}")]
    ReasoningUnreachable(#[source] ReasoningError),

    #[error("Stage data unavailable: {0}")]
    StageData(String),

    #[error("Cannot apply {decision} to a process that is {status}")]
    InvalidTransition {
        status: StageStatus,
        decision: DecisionType,
    },

    #[error("Process {0} is not claimed by this worker")]
    NotClaimed(Uuid),

    #[error("Cannot resume a process that is {0}")]
    NotResumable(StageStatus),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T, E = MarathonError> = std::result::Result<T, E>;
