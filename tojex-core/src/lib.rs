pub mod color;
pub mod phase;
pub mod stimulus;
pub mod trial;

pub use color::HueAngle;
pub use phase::SessionPhase;
pub use stimulus::{
    Condition, Distractor, GridPosition, PairSlot, Placement, Quadrant, Role, Side, Target,
    TargetPair,
};
pub use trial::{
    is_correct, Answer, ResponseResult, ResponseSource, ResultRecord, TrialDescriptor, TrialState,
};
