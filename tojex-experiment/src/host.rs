//! Seams between the trial engine and whatever hosts it: speakers, the
//! stimulus display, instruction screens and result storage.

use crate::config::AudioConfig;
use crate::error::EngineError;
use std::path::{Path, PathBuf};
use tojex_core::{Condition, PairSlot, ResultRecord, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioCue {
    /// Polarity word, "now" or "not".
    Polarity { negated: bool },
    /// Colour word, e.g. `red`.
    Color(&'static str),
    Feedback { correct: bool },
}

impl AudioCue {
    pub fn token(&self) -> &str {
        match self {
            AudioCue::Polarity { negated: true } => "not",
            AudioCue::Polarity { negated: false } => "now",
            AudioCue::Color(name) => name,
            AudioCue::Feedback { correct: true } => "right",
            AudioCue::Feedback { correct: false } => "wrong",
        }
    }

    /// `<root>/<language>/<voice>/<token>.<ext>` for instructions and
    /// `<feedback_root>/<token>.<ext>` for feedback.
    pub fn path(&self, audio: &AudioConfig, voice: &str) -> PathBuf {
        let file = format!("{}.{}", self.token(), audio.extension);
        match self {
            AudioCue::Feedback { .. } => audio.feedback_root.join(file),
            _ => audio.root.join(&audio.language).join(voice).join(file),
        }
    }
}

/// Plays a cue to completion.
#[allow(async_fn_in_trait)]
pub trait AudioPlayer {
    async fn play(&self, cue: &AudioCue, path: &Path) -> Result<(), EngineError>;
}

/// Places the trial's targets and hands back a lease over them.
pub trait StimulusSurface {
    type Lease: StimulusLease;

    fn present(&self, condition: &Condition) -> Result<Self::Lease, EngineError>;
}

/// Live stimulus elements of one trial. Dropping the lease removes them,
/// whichever way the trial ended.
pub trait StimulusLease {
    fn flash(&mut self, slot: PairSlot, role: Role);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Screen {
    Welcome,
    TutorialInstructions { attempt: usize, max_attempts: usize },
    TutorialPassed { correct: usize, total: usize },
    TutorialRetry { correct: usize, total: usize, required: usize },
    TutorialFailed { correct: usize, total: usize, required: usize },
    Pause { block: usize, block_count: usize },
    Final,
    Debrief { accuracy: f64 },
}

/// Shows an instruction or pause screen and waits until the participant
/// moves on.
#[allow(async_fn_in_trait)]
pub trait ScreenPresenter {
    async fn show(&self, screen: &Screen) -> Result<(), EngineError>;
}

pub trait ResultSink {
    fn record(&mut self, record: &ResultRecord) -> std::io::Result<()>;
}

impl ResultSink for Vec<ResultRecord> {
    fn record(&mut self, record: &ResultRecord) -> std::io::Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_and_feedback_paths() {
        let audio = AudioConfig::default();
        assert_eq!(
            AudioCue::Color("green").path(&audio, "f"),
            PathBuf::from("media/audio/color-toj-negation/en/f/green.wav")
        );
        assert_eq!(
            AudioCue::Polarity { negated: true }.path(&audio, "m"),
            PathBuf::from("media/audio/color-toj-negation/en/m/not.wav")
        );
        assert_eq!(
            AudioCue::Feedback { correct: false }.path(&audio, "m"),
            PathBuf::from("media/audio/feedback/wrong.wav")
        );
    }
}
