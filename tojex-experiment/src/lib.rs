pub mod balancer;
pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod response;
pub mod schedule;
pub mod session;
pub mod trial;
pub mod tutorial;

pub use balancer::{audit, BalanceAudit, SequenceBalancer, TrialPlan};
pub use condition::ConditionGenerator;
pub use config::{
    AudioConfig, DesignConfig, ExperimentConfig, GridSize, InputConfig, LayoutConfig, PairLayout,
    ResponseMode, SoaLevels, TimingConfig, TouchMode, TutorialConfig,
};
pub use engine::TojEngine;
pub use error::{BalanceError, ConfigError, EngineError, SessionError};
pub use host::{AudioCue, AudioPlayer, ResultSink, Screen, ScreenPresenter, StimulusLease, StimulusSurface};
pub use response::{first_settled, response_sources, Captured, InputEvent, InputFilter, InputHub, InputKind, ListenerCounters, SourceSpec, Subscription};
pub use schedule::{BlockScheduler, ScheduleStep};
pub use session::{Session, SessionOutcome, SessionPlan, SessionSummary};
pub use trial::TrialTimeline;
pub use tutorial::{TutorialOutcome, TutorialPolicy, TutorialSupervisor, TutorialVerdict};
