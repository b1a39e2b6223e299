//! Detects contradictions between consecutive belief states.
//!
//! Two sources feed the result: corrections the reasoning service narrated
//! itself, and a synthetic `confidence_drop` entry whenever confidence fell
//! by more than the threshold, narrated or not.

use crate::state_machine::{BeliefState, CorrectionKind, SelfCorrection, Stage};

pub const DEFAULT_CONFIDENCE_DROP_THRESHOLD: f64 = 0.2;

// Absorbs float noise so a drop of exactly the threshold does not count.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct CorrectionDetector {
    pub confidence_drop_threshold: f64,
}

impl Default for CorrectionDetector {
    fn default() -> Self {
        Self {
            confidence_drop_threshold: DEFAULT_CONFIDENCE_DROP_THRESHOLD,
        }
    }
}

impl CorrectionDetector {
    pub fn new(confidence_drop_threshold: f64) -> Self {
        Self {
            confidence_drop_threshold,
        }
    }

    /// Corrections attributable to the step that turned `old` into `new`.
    pub fn detect(&self, old: &BeliefState, new: &BeliefState, stage: Stage) -> Vec<SelfCorrection> {
        let mut found: Vec<SelfCorrection> = new
            .self_corrections
            .iter()
            .skip(old.self_corrections.len())
            .cloned()
            .collect();

        let drop = old.decision_confidence - new.decision_confidence;
        if drop > self.confidence_drop_threshold + EPSILON {
            found.push(SelfCorrection {
                stage: stage.to_string(),
                original_belief: format!("decision confidence {:.2}", old.decision_confidence),
                correction: format!("decision confidence {:.2}", new.decision_confidence),
                impact: format!("confidence dropped by {drop:.2} without explanation"),
                kind: CorrectionKind::ConfidenceDrop,
            });
        }

        found
    }

    /// The belief state to persist: `new`, with its correction history
    /// rebuilt as `old`'s history plus everything found this step.
    pub fn merge(old: &BeliefState, new: BeliefState, found: &[SelfCorrection]) -> BeliefState {
        let mut merged = new;
        merged.self_corrections = old
            .self_corrections
            .iter()
            .chain(found.iter())
            .cloned()
            .collect();
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correction(text: &str) -> SelfCorrection {
        SelfCorrection {
            stage: "phone_screen".into(),
            original_belief: "unclear".into(),
            correction: text.into(),
            impact: "minor".into(),
            kind: CorrectionKind::Explicit,
        }
    }

    fn belief(confidence: f64, corrections: Vec<SelfCorrection>) -> BeliefState {
        BeliefState {
            decision_confidence: confidence,
            self_corrections: corrections,
            ..BeliefState::initial()
        }
    }

    #[test]
    fn two_explicit_plus_confidence_drop_yields_three() {
        let old = belief(0.9, vec![correction("first")]);
        let new = belief(
            0.6,
            vec![correction("first"), correction("second"), correction("third")],
        );
        let found = CorrectionDetector::default().detect(&old, &new, Stage::PhoneScreen);

        assert_eq!(found.len(), 3);
        assert_eq!(found[0].correction, "second");
        assert_eq!(found[1].correction, "third");
        assert_eq!(found[2].kind, CorrectionKind::ConfidenceDrop);
        assert_eq!(found[2].stage, "phone_screen");
    }

    #[test]
    fn silent_confidence_drop_is_synthesized() {
        let old = belief(0.8, Vec::new());
        let new = belief(0.5, Vec::new());
        let found = CorrectionDetector::default().detect(&old, &new, Stage::Assessment);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, CorrectionKind::ConfidenceDrop);
    }

    #[test]
    fn drop_of_exactly_threshold_is_not_a_correction() {
        let old = belief(0.8, Vec::new());
        let new = belief(0.6, Vec::new());
        assert!(CorrectionDetector::default()
            .detect(&old, &new, Stage::Screening)
            .is_empty());
    }

    #[test]
    fn rising_confidence_yields_nothing() {
        let old = belief(0.4, Vec::new());
        let new = belief(0.9, Vec::new());
        assert!(CorrectionDetector::default()
            .detect(&old, &new, Stage::Screening)
            .is_empty());
    }

    #[test]
    fn truncated_history_contributes_no_explicit_corrections() {
        let old = belief(0.7, vec![correction("a"), correction("b")]);
        let new = belief(0.7, vec![correction("a")]);
        assert!(CorrectionDetector::default()
            .detect(&old, &new, Stage::Screening)
            .is_empty());
    }

    #[test]
    fn merge_keeps_history_append_only() {
        let old = belief(0.9, vec![correction("a"), correction("b")]);
        let new = belief(0.5, vec![correction("rewritten")]);
        let found = CorrectionDetector::default().detect(&old, &new, Stage::Offer);
        let merged = CorrectionDetector::merge(&old, new, &found);

        assert_eq!(merged.self_corrections.len(), 3);
        assert_eq!(merged.self_corrections[0].correction, "a");
        assert_eq!(merged.self_corrections[1].correction, "b");
        assert_eq!(merged.self_corrections[2].kind, CorrectionKind::ConfidenceDrop);
        assert_eq!(merged.decision_confidence, 0.5);
    }

    #[test]
    fn custom_threshold_is_respected() {
        let old = belief(0.9, Vec::new());
        let new = belief(0.75, Vec::new());
        let found = CorrectionDetector::new(0.1).detect(&old, &new, Stage::Screening);
        assert_eq!(found.len(), 1);
    }
}
