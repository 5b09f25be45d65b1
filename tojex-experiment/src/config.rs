use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tojex_core::{Answer, Side};

/// Duration of one frame on a 60 Hz display, in ms.
pub const FRAME_MS: f64 = 16.6667;

/// Rounds a millisecond value to three decimals.
pub fn round_ms(ms: f64) -> f64 {
    (ms * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub design: DesignConfig,
    pub tutorial: TutorialConfig,
    pub layout: LayoutConfig,
    pub timing: TimingConfig,
    pub input: InputConfig,
    pub audio: AudioConfig,
    pub output: OutputConfig,
    /// Returning participants get the shorter tutorial.
    pub first_participation: bool,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            design: DesignConfig::default(),
            tutorial: TutorialConfig::default(),
            layout: LayoutConfig::default(),
            timing: TimingConfig::default(),
            input: InputConfig::default(),
            audio: AudioConfig::default(),
            output: OutputConfig::default(),
            first_participation: true,
        }
    }
}

impl ExperimentConfig {
    /// Parses a JSON document; missing sections and fields take defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Number of tutorial trials this participant has to complete.
    pub fn tutorial_trials(&self) -> usize {
        if self.first_participation {
            self.tutorial.trials
        } else {
            self.tutorial.repeated_trials
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.design.validate()?;
        self.tutorial.validate()?;
        self.layout.validate()?;
        self.timing.validate()?;
        self.input.validate()?;
        self.audio.validate()?;

        let available = self.tutorial.design.trial_count();
        let requested = self.tutorial_trials();
        if requested > available {
            return Err(ConfigError::TutorialTooShort {
                requested,
                available,
            });
        }
        Ok(())
    }
}

fn default_frame_ms() -> f64 {
    FRAME_MS
}

/// SOA levels, either listed directly in ms or as signed frame counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SoaLevels {
    Frames {
        frames: Vec<i32>,
        #[serde(default = "default_frame_ms")]
        frame_ms: f64,
    },
    Millis(Vec<f64>),
}

impl SoaLevels {
    pub fn from_frames(frames: &[i32]) -> Self {
        SoaLevels::Frames {
            frames: frames.to_vec(),
            frame_ms: FRAME_MS,
        }
    }

    /// Signed SOAs in ms, rounded to three decimals.
    pub fn levels(&self) -> Vec<f64> {
        match self {
            SoaLevels::Frames { frames, frame_ms } => frames
                .iter()
                .map(|f| round_ms(*f as f64 * frame_ms))
                .collect(),
            SoaLevels::Millis(ms) => ms.iter().copied().map(round_ms).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SoaLevels::Frames { frames, .. } => frames.len(),
            SoaLevels::Millis(ms) => ms.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Factor levels plus the balancing policy for one trial list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignConfig {
    pub polarities: Vec<bool>,
    pub probe_left: Vec<bool>,
    pub soa: SoaLevels,
    /// Empty selects plain factorial shuffling; otherwise polarity runs of
    /// these lengths are balanced.
    pub sequence_lengths: Vec<usize>,
    pub repetitions: usize,
    pub block_size: usize,
    /// When false, probe side is drawn per trial instead of being crossed.
    pub probe_left_is_factor: bool,
    /// Start a new block rather than let a run push a block past its size.
    pub always_stay_under_block_size: bool,
}

impl Default for DesignConfig {
    fn default() -> Self {
        Self {
            polarities: vec![true, false],
            probe_left: vec![true, false],
            soa: SoaLevels::from_frames(&[-6, -3, -1, 0, 1, 3, 6]),
            sequence_lengths: vec![1, 2, 5],
            repetitions: 1,
            block_size: 40,
            probe_left_is_factor: true,
            always_stay_under_block_size: false,
        }
    }
}

impl DesignConfig {
    /// Design for a plain shuffled list without run balancing.
    pub fn factorial(soa: SoaLevels, repetitions: usize, block_size: usize) -> Self {
        Self {
            soa,
            sequence_lengths: Vec::new(),
            repetitions,
            block_size,
            ..Self::default()
        }
    }

    pub fn is_run_balanced(&self) -> bool {
        !self.sequence_lengths.is_empty()
    }

    pub fn soa_levels(&self) -> Vec<f64> {
        self.soa.levels()
    }

    fn probe_side_levels(&self) -> usize {
        if self.probe_left_is_factor {
            self.probe_left.len()
        } else {
            1
        }
    }

    /// Trial count of the plain factorial product times repetitions.
    pub fn factorial_cardinality(&self) -> usize {
        self.repetitions * self.polarities.len() * self.probe_side_levels() * self.soa.len()
    }

    /// Total trial count the balancer will produce.
    pub fn trial_count(&self) -> usize {
        if !self.is_run_balanced() {
            return self.factorial_cardinality();
        }
        let runs_per_length = self.repetitions * self.soa.len() * self.probe_side_levels();
        let per_polarity: usize = self.sequence_lengths.iter().sum::<usize>() * runs_per_length;
        per_polarity * self.polarities.len()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polarities.is_empty() {
            return Err(ConfigError::EmptyFactor("polarities"));
        }
        if self.probe_left.is_empty() {
            return Err(ConfigError::EmptyFactor("probe_left"));
        }
        if self.soa.is_empty() {
            return Err(ConfigError::EmptyFactor("soa"));
        }
        if self.repetitions == 0 {
            return Err(ConfigError::Zero("repetitions"));
        }
        if self.block_size == 0 {
            return Err(ConfigError::Zero("block_size"));
        }
        if self.is_run_balanced() {
            if self.sequence_lengths.contains(&0) {
                return Err(ConfigError::Zero("sequence_lengths"));
            }
            let mut polarities = self.polarities.clone();
            polarities.sort();
            if polarities != [false, true] {
                return Err(ConfigError::PolarityLevels(self.polarities.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorialConfig {
    pub design: DesignConfig,
    /// Trials per attempt for first-time participants.
    pub trials: usize,
    /// Trials per attempt for returning participants.
    pub repeated_trials: usize,
    pub pass_ratio: f64,
    pub max_attempts: usize,
}

impl Default for TutorialConfig {
    fn default() -> Self {
        Self {
            design: DesignConfig::factorial(SoaLevels::from_frames(&[-6, -3, 3, 6]), 10, 1000),
            trials: 30,
            repeated_trials: 10,
            pass_ratio: 0.7,
            max_attempts: 2,
        }
    }
}

impl TutorialConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.design.validate()?;
        if self.trials == 0 {
            return Err(ConfigError::Zero("tutorial.trials"));
        }
        if self.repeated_trials == 0 {
            return Err(ConfigError::Zero("tutorial.repeated_trials"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Zero("tutorial.max_attempts"));
        }
        if !(0.0..=1.0).contains(&self.pass_ratio) {
            return Err(ConfigError::PassRatio(self.pass_ratio));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairLayout {
    /// One probe/reference pair on the left and right halves.
    Single,
    /// Two pairs over the four quadrants, one of them a distractor.
    Dual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub pairs: PairLayout,
    pub grid: GridSize,
    /// Inclusive column range for targets on the left side.
    pub left_x_range: (u32, u32),
    pub right_x_range: (u32, u32),
    pub y_range: (u32, u32),
    /// Single layout: the reference sits `alpha` degrees either side of the
    /// probe's complement (0 means exactly the complement). Dual layout:
    /// each pair's second target sits `alpha` degrees from its anchor.
    pub alpha: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            pairs: PairLayout::Single,
            grid: GridSize { x: 7, y: 7 },
            left_x_range: (3, 5),
            right_x_range: (2, 4),
            y_range: (2, 5),
            alpha: 0.0,
        }
    }
}

impl LayoutConfig {
    pub fn dual() -> Self {
        Self {
            pairs: PairLayout::Dual,
            grid: GridSize { x: 7, y: 4 },
            left_x_range: (2, 5),
            right_x_range: (1, 4),
            y_range: (1, 2),
            alpha: 20.0,
        }
    }

    pub fn x_range(&self, side: Side) -> (u32, u32) {
        match side {
            Side::Left => self.left_x_range,
            Side::Right => self.right_x_range,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.x == 0 {
            return Err(ConfigError::Zero("layout.grid.x"));
        }
        if self.grid.y == 0 {
            return Err(ConfigError::Zero("layout.grid.y"));
        }
        let ranges = [
            ("layout.left_x_range", self.left_x_range, self.grid.x),
            ("layout.right_x_range", self.right_x_range, self.grid.x),
            ("layout.y_range", self.y_range, self.grid.y),
        ];
        for (name, (min, max), extent) in ranges {
            if min > max {
                return Err(ConfigError::InvalidRange {
                    name,
                    min: min as u64,
                    max: max as u64,
                });
            }
            if max >= extent {
                return Err(ConfigError::OutsideGrid { name, max, extent });
            }
        }
        if !(0.0..=90.0).contains(&self.alpha) {
            return Err(ConfigError::Alpha(self.alpha));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Inclusive fixation duration range in ms.
    pub fixation_range_ms: (u64, u64),
    /// How long a flashed target stays highlighted.
    pub flash_ms: u64,
    /// Nominal display frame; SOAs off this grid get a warning.
    pub frame_ms: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fixation_range_ms: (300, 500),
            flash_ms: 30,
            frame_ms: FRAME_MS,
        }
    }
}

impl TimingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (min, max) = self.fixation_range_ms;
        if min > max {
            return Err(ConfigError::InvalidRange {
                name: "timing.fixation_range_ms",
                min,
                max,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseMode {
    /// Report which side flashed first.
    WhichSide,
    /// Report whether the cued colour flashed first or second.
    FirstOrSecond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TouchMode {
    /// A touch on either screen half picks that side's answer.
    Halves,
    /// A double tap anywhere picks `double_tap`; a long press picks the
    /// other side.
    Gestures {
        double_tap: Side,
        double_tap_window_ms: u64,
        long_press_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub left_key: String,
    pub right_key: String,
    pub mode: ResponseMode,
    /// Swaps which physical side means "first" in first-or-second mode.
    pub answer_keys_switched: bool,
    pub touch: TouchMode,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            left_key: "q".into(),
            right_key: "p".into(),
            mode: ResponseMode::FirstOrSecond,
            answer_keys_switched: false,
            touch: TouchMode::Halves,
        }
    }
}

impl InputConfig {
    /// Maps a physical choice (left key, left half, ...) to an answer.
    pub fn answer_for(&self, side: Side) -> Answer {
        match self.mode {
            ResponseMode::WhichSide => match side {
                Side::Left => Answer::Left,
                Side::Right => Answer::Right,
            },
            ResponseMode::FirstOrSecond => {
                let first = if self.answer_keys_switched {
                    Side::Right
                } else {
                    Side::Left
                };
                if side == first {
                    Answer::First
                } else {
                    Answer::Second
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.left_key.eq_ignore_ascii_case(&self.right_key) {
            return Err(ConfigError::SameKeys(self.left_key.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub root: PathBuf,
    pub feedback_root: PathBuf,
    pub language: String,
    pub voices: Vec<String>,
    pub extension: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("media/audio/color-toj-negation"),
            feedback_root: PathBuf::from("media/audio/feedback"),
            language: "en".into(),
            voices: vec!["m".into(), "f".into()],
            extension: "wav".into(),
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.voices.is_empty() {
            return Err(ConfigError::NoVoices);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub results_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_path: PathBuf::from("experiment_results.json"),
        }
    }
}
