use std::time::Duration;
use tokio::time::Instant;

/// Moments of one trial as the engine saw them.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialTimeline {
    pub start: Instant,
    pub fixation_start: Option<Instant>,
    pub first_flash: Option<Instant>,
    pub second_flash: Option<Instant>,
    pub response_window_open: Option<Instant>,
    pub response: Option<Instant>,
}

impl TrialTimeline {
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            fixation_start: None,
            first_flash: None,
            second_flash: None,
            response_window_open: None,
            response: None,
        }
    }

    /// Measured onset asynchrony of the primary pair.
    pub fn flash_gap(&self) -> Option<Duration> {
        Some(self.second_flash?.saturating_duration_since(self.first_flash?))
    }

    pub fn reaction_time(&self) -> Option<Duration> {
        Some(self.response?.saturating_duration_since(self.response_window_open?))
    }

    pub fn instruction_duration(&self) -> Option<Duration> {
        Some(self.fixation_start?.saturating_duration_since(self.start))
    }
}
