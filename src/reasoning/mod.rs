//! Reasoning service port.
//!
//! A reasoning service maps (belief state, stage evidence) to a decision.
//! Implementations return the raw payload; validating it is the belief state
//! manager's job, so a service never has to be trusted to produce a
//! well-formed result.

mod anthropic;

pub use anthropic::AnthropicReasoner;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::state_machine::{BeliefState, Stage};

#[derive(Debug, Error)]
pub enum ReasoningError {
    /// No response was obtained at all (connection failure, rate limit).
    #[error("reasoning service unreachable: {0}")]
    Unreachable(String),

    #[error("reasoning service timed out after {0:?}")]
    Timeout(Duration),

    /// A response arrived but it is not something we can use.
    #[error("invalid reasoning response: {0}")]
    InvalidResponse(String),
}

impl ReasoningError {
    /// Whether the caller should block and retry rather than fall back.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ReasoningError::Unreachable(_) | ReasoningError::Timeout(_)
        )
    }
}

/// Everything the reasoning service sees for one orchestration step.
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningContext {
    pub process_id: Uuid,
    pub job_id: String,
    pub application_id: String,
    pub stage: Stage,
    pub belief_state: BeliefState,
    pub stage_data: Value,
    pub correction_count: u32,
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Return the service's raw structured answer for `context`.
    async fn reason(&self, context: &ReasoningContext) -> Result<String, ReasoningError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_classification() {
        assert!(ReasoningError::Unreachable("refused".into()).is_unreachable());
        assert!(ReasoningError::Timeout(Duration::from_secs(1)).is_unreachable());
        assert!(!ReasoningError::InvalidResponse("500".into()).is_unreachable());
    }

    #[test]
    fn timeout_display() {
        let err = ReasoningError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "reasoning service timed out after 250ms");
    }
}
