use serde::{Deserialize, Serialize};

/// Session phases, in the order a participant goes through them.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Welcome,
    Tutorial,
    Experiment,
    Debrief,
}

impl SessionPhase {
    pub fn next(&self) -> Option<Self> {
        use SessionPhase::*;
        Some(match self {
            Welcome => Tutorial,
            Tutorial => Experiment,
            Experiment => Debrief,
            Debrief => return None,
        })
    }

    /// Tutorial trials end with a right/wrong sound.
    pub fn plays_feedback(&self) -> bool {
        matches!(self, Self::Tutorial)
    }

    pub fn is_experiment(&self) -> bool {
        matches!(self, SessionPhase::Experiment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_advance_in_order() {
        let mut phase = SessionPhase::default();
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            phase = next;
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                SessionPhase::Welcome,
                SessionPhase::Tutorial,
                SessionPhase::Experiment,
                SessionPhase::Debrief
            ]
        );
        assert!(SessionPhase::Tutorial.plays_feedback());
        assert!(!SessionPhase::Experiment.plays_feedback());
    }
}
