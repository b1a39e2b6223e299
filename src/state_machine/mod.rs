mod belief;
mod decision;
mod policy;
mod process;
mod stage;

pub use belief::{
    BELIEF_SCHEMA_VERSION, BeliefDecodeError, BeliefState, CorrectionKind, INITIAL_CONFIDENCE,
    SelfCorrection, StageInsight, clamp_confidence,
};
pub use decision::DecisionResult;
pub use policy::{DEFAULT_AUTONOMY_FLOOR, DecisionPolicy, PolicyVerdict, Transition};
pub use process::ProcessState;
pub use stage::{DecisionType, Stage, StageStatus};
