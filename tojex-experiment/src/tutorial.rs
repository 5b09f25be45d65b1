use crate::balancer::SequenceBalancer;
use crate::config::ExperimentConfig;
use crate::engine::TojEngine;
use crate::error::{ConfigError, SessionError};
use crate::host::{AudioPlayer, ResultSink, Screen, ScreenPresenter, StimulusSurface};
use rand::Rng;
use serde::Serialize;
use tojex_core::{SessionPhase, TrialDescriptor};
use tojex_timing::Timer;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TutorialVerdict {
    Passed,
    Retry,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TutorialPolicy {
    pub trials: usize,
    pub pass_ratio: f64,
    pub max_attempts: usize,
}

impl TutorialPolicy {
    pub fn from_config(config: &ExperimentConfig) -> Self {
        Self {
            trials: config.tutorial_trials(),
            pass_ratio: config.tutorial.pass_ratio,
            max_attempts: config.tutorial.max_attempts,
        }
    }

    /// `floor(pass_ratio * trials)`; the epsilon absorbs binary rounding of
    /// ratios like 0.7.
    pub fn required_correct(&self) -> usize {
        (self.pass_ratio * self.trials as f64 + 1e-9).floor() as usize
    }

    /// Verdict after `attempt` (1-based) with `correct` right answers.
    pub fn evaluate(&self, correct: usize, attempt: usize) -> TutorialVerdict {
        if correct >= self.required_correct() {
            TutorialVerdict::Passed
        } else if attempt < self.max_attempts {
            TutorialVerdict::Retry
        } else {
            TutorialVerdict::Failed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TutorialOutcome {
    pub passed: bool,
    pub attempts: usize,
    /// Correct answers in the last attempt.
    pub correct: usize,
    pub required: usize,
}

/// Runs tutorial attempts with feedback until the participant passes or
/// runs out of attempts.
#[derive(Debug, Clone)]
pub struct TutorialSupervisor {
    policy: TutorialPolicy,
    balancer: SequenceBalancer,
}

impl TutorialSupervisor {
    pub fn new(config: &ExperimentConfig) -> Result<Self, ConfigError> {
        config.tutorial.validate()?;
        Ok(Self {
            policy: TutorialPolicy::from_config(config),
            balancer: SequenceBalancer::new(config.tutorial.design.clone())?,
        })
    }

    pub fn policy(&self) -> &TutorialPolicy {
        &self.policy
    }

    /// A freshly shuffled tutorial list, cut to the attempt length.
    pub fn attempt_trials<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<TrialDescriptor>, SessionError> {
        let mut plan = self.balancer.build(rng)?;
        plan.trials.truncate(self.policy.trials);
        Ok(plan.trials)
    }

    pub async fn run<A, S, T, R, P, K>(
        &self,
        engine: &mut TojEngine<A, S, T, R>,
        presenter: &P,
        sink: &mut K,
    ) -> Result<TutorialOutcome, SessionError>
    where
        A: AudioPlayer,
        S: StimulusSurface,
        T: Timer,
        R: Rng,
        P: ScreenPresenter,
        K: ResultSink,
    {
        let required = self.policy.required_correct();
        let mut attempt = 0;
        loop {
            attempt += 1;
            presenter
                .show(&Screen::TutorialInstructions {
                    attempt,
                    max_attempts: self.policy.max_attempts,
                })
                .await?;

            let trials = self.attempt_trials(engine.rng_mut())?;
            let total = trials.len();
            let mut correct = 0;
            for trial in &trials {
                let record = engine.run_trial(trial, SessionPhase::Tutorial).await?;
                if record.response.correct {
                    correct += 1;
                }
                sink.record(&record)?;
            }

            let verdict = self.policy.evaluate(correct, attempt);
            info!(attempt, correct, total, required, ?verdict, "tutorial attempt finished");
            match verdict {
                TutorialVerdict::Passed => {
                    presenter
                        .show(&Screen::TutorialPassed { correct, total })
                        .await?;
                }
                TutorialVerdict::Retry => {
                    presenter
                        .show(&Screen::TutorialRetry {
                            correct,
                            total,
                            required,
                        })
                        .await?;
                    continue;
                }
                TutorialVerdict::Failed => {
                    presenter
                        .show(&Screen::TutorialFailed {
                            correct,
                            total,
                            required,
                        })
                        .await?;
                }
            }
            return Ok(TutorialOutcome {
                passed: verdict == TutorialVerdict::Passed,
                attempts: attempt,
                correct,
                required,
            });
        }
    }
}
