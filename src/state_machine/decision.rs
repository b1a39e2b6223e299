//! Validated output of one reasoning pass.

use serde::{Deserialize, Serialize};

use super::belief::BeliefState;
use super::stage::DecisionType;

/// A validated result from one reasoning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub decision: DecisionType,
    pub confidence: f64,
    pub reasoning: String,
    pub updated_belief_state: BeliefState,
    pub next_action: Option<String>,
    pub requires_human_review: bool,
}

impl DecisionResult {
    /// The safe result used when a response could not be used.
    ///
    /// Escalates with zero confidence and leaves the belief state untouched.
    pub fn fallback(prior: &BeliefState, cause: &str) -> Self {
        Self {
            decision: DecisionType::Escalate,
            confidence: 0.0,
            reasoning: format!("Reasoning response unusable, human review required: {cause}"),
            updated_belief_state: prior.clone(),
            next_action: None,
            requires_human_review: true,
        }
    }
}
