use crate::phase::SessionPhase;
use crate::stimulus::{Condition, Side};
use serde::{Deserialize, Serialize};

/// Engine states of a single trial, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialState {
    Idle,
    PlayingInstruction,
    Fixating,
    Modifying,
    AwaitingResponse,
    Scored,
    Finished,
}

/// One planned trial. Produced once by the balancer and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialDescriptor {
    pub is_instruction_negated: bool,
    pub probe_left: bool,
    /// Signed onset asynchrony in ms; negative means the probe leads.
    pub soa: f64,
    pub sequence_length: Option<usize>,
    pub rank: Option<usize>,
    pub block_index: usize,
    pub trial_index: usize,
    pub trial_index_in_block: usize,
}

impl TrialDescriptor {
    pub fn probe_side(&self) -> Side {
        Side::from_is_left(self.probe_left)
    }
}

/// What the participant reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Answer {
    Left,
    Right,
    First,
    Second,
}

impl Answer {
    /// Whether the answer claims the probe (cued stimulus) flashed first.
    /// Side answers name the side that flashed first.
    pub fn says_probe_first(self, probe_side: Side) -> bool {
        match self {
            Answer::Left => probe_side == Side::Left,
            Answer::Right => probe_side == Side::Right,
            Answer::First => true,
            Answer::Second => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
    Key,
    Tap,
    DoubleTap,
    LongPress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseResult {
    pub answer: Answer,
    pub response_source: ResponseSource,
    pub response_key: Option<String>,
    /// Milliseconds from the opening of the response window.
    pub rt: u64,
    pub correct: bool,
}

/// Scoring rule. A zero SOA is ambiguous and always counts as correct;
/// otherwise the answer is correct when it agrees with whether the probe
/// actually led.
pub fn is_correct(soa: f64, responded_probe_first: bool) -> bool {
    soa == 0.0 || (soa < 0.0) == responded_probe_first
}

/// Everything logged for one completed trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    #[serde(flatten)]
    pub descriptor: TrialDescriptor,
    pub condition: Condition,
    pub phase: SessionPhase,
    pub instruction_language: String,
    pub instruction_voice: String,
    pub instruction_color: String,
    pub play_feedback: bool,
    #[serde(flatten)]
    pub response: ResponseResult,
}
