use thiserror::Error;

/// Degenerate configuration, reported before anything is generated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("factor `{0}` has no levels")]
    EmptyFactor(&'static str),

    #[error("`{0}` must be at least 1")]
    Zero(&'static str),

    #[error("run-length balancing needs exactly the polarity levels [true, false], got {0:?}")]
    PolarityLevels(Vec<bool>),

    #[error("invalid range `{name}`: {min}..={max}")]
    InvalidRange {
        name: &'static str,
        min: u64,
        max: u64,
    },

    #[error("range `{name}` reaches {max} but the grid only has {extent} cells")]
    OutsideGrid {
        name: &'static str,
        max: u32,
        extent: u32,
    },

    #[error("alpha must be within 0..=90 degrees, got {0}")]
    Alpha(f64),

    #[error("no instruction voices configured")]
    NoVoices,

    #[error("both answers are bound to key `{0}`")]
    SameKeys(String),

    #[error("tutorial pass ratio must be within 0..=1, got {0}")]
    PassRatio(f64),

    #[error("tutorial asks for {requested} trials but its design yields only {available}")]
    TutorialTooShort { requested: usize, available: usize },
}

/// A design whose runs cannot be packed under the configured policy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BalanceError {
    #[error("a run of {length} trials cannot fit into blocks of {block_size}")]
    RunExceedsBlock { length: usize, block_size: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("response race started without any response source")]
    NoResponseSources,

    #[error("every response source closed before a response arrived")]
    InputClosed,

    #[error("audio playback failed: {0}")]
    Audio(String),

    #[error("stimulus surface failed: {0}")]
    Surface(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Balance(#[from] BalanceError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to record trial result: {0}")]
    Sink(#[from] std::io::Error),
}
