//! Hiring stages, process statuses and decision kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The four hiring stages a marathon walks through.
///
/// Each process flows through: SCREENING → PHONE_SCREEN → ASSESSMENT → OFFER
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Screening,
    PhoneScreen,
    Assessment,
    Offer,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Screening,
        Stage::PhoneScreen,
        Stage::Assessment,
        Stage::Offer,
    ];

    /// The stage that follows this one, or `None` at the final stage.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Screening => Some(Stage::PhoneScreen),
            Stage::PhoneScreen => Some(Stage::Assessment),
            Stage::Assessment => Some(Stage::Offer),
            Stage::Offer => None,
        }
    }

    /// Key used for `stage_insights` and stage data lookups.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Screening => "screening",
            Stage::PhoneScreen => "phone_screen",
            Stage::Assessment => "assessment",
            Stage::Offer => "offer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Blocked,
    Escalated,
    Completed,
}

impl StageStatus {
    /// Terminal statuses receive no further automatic mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Escalated | StageStatus::Completed)
    }

    /// Statuses the scheduler may pick up once their action is due.
    pub fn is_schedulable(self) -> bool {
        matches!(self, StageStatus::Pending | StageStatus::Blocked)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Blocked => "blocked",
            StageStatus::Escalated => "escalated",
            StageStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A routing decision, either as reported by the reasoning service or as applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Advance,
    Reject,
    Escalate,
    Hold,
}

impl DecisionType {
    /// Decisions that cannot be undone without a human.
    pub fn is_irreversible(self) -> bool {
        matches!(self, DecisionType::Advance | DecisionType::Reject)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionType::Advance => "advance",
            DecisionType::Reject => "reject",
            DecisionType::Escalate => "escalate",
            DecisionType::Hold => "hold",
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advance" => Ok(DecisionType::Advance),
            "reject" => Ok(DecisionType::Reject),
            "escalate" => Ok(DecisionType::Escalate),
            "hold" => Ok(DecisionType::Hold),
            other => Err(format!("unknown decision: {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_walk_forward_to_offer() {
        assert_eq!(Stage::Screening.next(), Some(Stage::PhoneScreen));
        assert_eq!(Stage::PhoneScreen.next(), Some(Stage::Assessment));
        assert_eq!(Stage::Assessment.next(), Some(Stage::Offer));
        assert_eq!(Stage::Offer.next(), None);
    }

    #[test]
    fn stage_order_matches_progression() {
        for pair in Stage::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
    }

    #[test]
    fn stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::PhoneScreen).unwrap();
        assert_eq!(json, r#""phone_screen""#);
        assert_eq!(Stage::PhoneScreen.to_string(), "phone_screen");
    }

    #[test]
    fn terminal_and_schedulable_statuses() {
        assert!(StageStatus::Escalated.is_terminal());
        assert!(StageStatus::Completed.is_terminal());
        assert!(!StageStatus::Blocked.is_terminal());
        assert!(StageStatus::Pending.is_schedulable());
        assert!(StageStatus::Blocked.is_schedulable());
        assert!(!StageStatus::InProgress.is_schedulable());
    }

    #[test]
    fn decision_parses_case_insensitively() {
        assert_eq!("Advance".parse::<DecisionType>(), Ok(DecisionType::Advance));
        assert_eq!(" HOLD ".parse::<DecisionType>(), Ok(DecisionType::Hold));
        assert!("promote".parse::<DecisionType>().is_err());
    }
}
