use crate::balancer::{SequenceBalancer, TrialPlan};
use crate::config::ExperimentConfig;
use crate::engine::TojEngine;
use crate::error::SessionError;
use crate::host::{AudioPlayer, ResultSink, Screen, ScreenPresenter, StimulusSurface};
use crate::schedule::{BlockScheduler, ScheduleStep};
use crate::tutorial::{TutorialOutcome, TutorialSupervisor};
use rand::Rng;
use serde::Serialize;
use tojex_core::{ResultRecord, SessionPhase};
use tojex_timing::{CalibrationStats, Timer};
use tracing::{info, warn};

/// Largest tolerated gap between an SOA and a whole number of frames.
pub const FRAME_TOLERANCE_MS: f64 = 1.0;

/// The main trial list and its block schedule, built once per session.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub plan: TrialPlan,
    pub schedule: BlockScheduler,
    soas: Vec<f64>,
}

impl SessionPlan {
    pub fn build<R: Rng + ?Sized>(config: &ExperimentConfig, rng: &mut R) -> Result<Self, SessionError> {
        config.validate()?;
        let plan = SequenceBalancer::new(config.design.clone())?.build(rng)?;
        let schedule = BlockScheduler::from_stamped(plan.trials.clone());
        info!(
            trials = plan.trials.len(),
            blocks = schedule.block_count(),
            "session planned"
        );
        Ok(Self {
            plan,
            schedule,
            soas: config.design.soa_levels(),
        })
    }

    /// SOAs that are not within tolerance of a whole number of frames.
    pub fn misaligned_soas(&self, stats: &CalibrationStats) -> Vec<f64> {
        let misaligned: Vec<f64> = self
            .soas
            .iter()
            .copied()
            .filter(|soa| stats.frame_misalignment_ms(*soa) > FRAME_TOLERANCE_MS)
            .collect();
        for soa in &misaligned {
            warn!(
                soa,
                frame_ms = stats.average_frame_ms(),
                "SOA is not a whole number of frames"
            );
        }
        misaligned
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoaAccuracy {
    pub soa: f64,
    pub correct: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub trials: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub mean_rt_ms: f64,
    pub min_rt_ms: u64,
    pub max_rt_ms: u64,
    pub by_soa: Vec<SoaAccuracy>,
}

impl SessionSummary {
    /// Summarizes experiment-phase records; tutorial records are skipped.
    pub fn from_records(records: &[ResultRecord]) -> Self {
        let main: Vec<&ResultRecord> = records.iter().filter(|r| r.phase.is_experiment()).collect();
        let trials = main.len();
        let correct = main.iter().filter(|r| r.response.correct).count();
        let rts: Vec<u64> = main.iter().map(|r| r.response.rt).collect();

        let mut by_soa: Vec<SoaAccuracy> = Vec::new();
        for record in &main {
            let soa = record.descriptor.soa;
            let found = by_soa.iter().position(|e| e.soa == soa);
            let index = match found {
                Some(i) => i,
                None => {
                    by_soa.push(SoaAccuracy {
                        soa,
                        correct: 0,
                        total: 0,
                    });
                    by_soa.len() - 1
                }
            };
            let entry = &mut by_soa[index];
            entry.total += 1;
            if record.response.correct {
                entry.correct += 1;
            }
        }
        by_soa.sort_by(|a, b| a.soa.total_cmp(&b.soa));

        Self {
            trials,
            correct,
            accuracy: if trials > 0 {
                correct as f64 / trials as f64
            } else {
                0.0
            },
            mean_rt_ms: if rts.is_empty() {
                0.0
            } else {
                rts.iter().sum::<u64>() as f64 / rts.len() as f64
            },
            min_rt_ms: rts.iter().copied().min().unwrap_or(0),
            max_rt_ms: rts.iter().copied().max().unwrap_or(0),
            by_soa,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionOutcome {
    Completed(SessionSummary),
    TutorialFailed(TutorialOutcome),
}

/// Drives a participant through welcome, tutorial, experiment and debrief.
pub struct Session<A, S, T, R, P, K>
where
    A: AudioPlayer,
    S: StimulusSurface,
    T: Timer,
    R: Rng,
    P: ScreenPresenter,
    K: ResultSink,
{
    engine: TojEngine<A, S, T, R>,
    presenter: P,
    sink: K,
    phase: SessionPhase,
    records: Vec<ResultRecord>,
}

impl<A, S, T, R, P, K> Session<A, S, T, R, P, K>
where
    A: AudioPlayer,
    S: StimulusSurface,
    T: Timer,
    R: Rng,
    P: ScreenPresenter,
    K: ResultSink,
{
    pub fn new(engine: TojEngine<A, S, T, R>, presenter: P, sink: K) -> Self {
        Self {
            engine,
            presenter,
            sink,
            phase: SessionPhase::default(),
            records: Vec::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn engine(&self) -> &TojEngine<A, S, T, R> {
        &self.engine
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    fn advance(&mut self) {
        if let Some(next) = self.phase.next() {
            info!(from = ?self.phase, to = ?next, "session phase");
            self.phase = next;
        }
    }

    pub async fn run(&mut self, plan: &SessionPlan) -> Result<SessionOutcome, SessionError> {
        self.phase = SessionPhase::Welcome;
        self.presenter.show(&Screen::Welcome).await?;

        self.advance();
        let supervisor = TutorialSupervisor::new(self.engine.config())?;
        let tutorial = supervisor
            .run(&mut self.engine, &self.presenter, &mut self.sink)
            .await?;
        if !tutorial.passed {
            warn!(
                attempts = tutorial.attempts,
                correct = tutorial.correct,
                required = tutorial.required,
                "tutorial failed, ending session"
            );
            return Ok(SessionOutcome::TutorialFailed(tutorial));
        }

        self.advance();
        for step in plan.schedule.steps() {
            match step {
                ScheduleStep::Trial(trial) => {
                    let record = self.engine.run_trial(&trial, SessionPhase::Experiment).await?;
                    self.sink.record(&record)?;
                    self.records.push(record);
                }
                ScheduleStep::Pause { block, block_count } => {
                    info!(block, block_count, "block finished");
                    self.presenter
                        .show(&Screen::Pause { block, block_count })
                        .await?;
                }
                ScheduleStep::Final { .. } => {
                    self.presenter.show(&Screen::Final).await?;
                }
            }
        }

        self.advance();
        let summary = SessionSummary::from_records(&self.records);
        info!(
            trials = summary.trials,
            accuracy = summary.accuracy,
            mean_rt_ms = summary.mean_rt_ms,
            "session finished"
        );
        self.presenter
            .show(&Screen::Debrief {
                accuracy: summary.accuracy,
            })
            .await?;
        Ok(SessionOutcome::Completed(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DesignConfig, SoaLevels};
    use crate::error::EngineError;
    use crate::host::{AudioCue, StimulusLease};
    use crate::response::{InputHub, InputKind};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;
    use std::time::Duration;
    use tojex_core::{Condition, PairSlot, Role};
    use tojex_timing::TokioTimer;

    struct SilentAudio;

    impl AudioPlayer for SilentAudio {
        async fn play(&self, _cue: &AudioCue, _path: &Path) -> Result<(), EngineError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    struct NullSurface;
    struct NullLease;

    impl StimulusSurface for NullSurface {
        type Lease = NullLease;
        fn present(&self, _condition: &Condition) -> Result<NullLease, EngineError> {
            Ok(NullLease)
        }
    }

    impl StimulusLease for NullLease {
        fn flash(&mut self, _slot: PairSlot, _role: Role) {}
    }

    #[derive(Clone, Default)]
    struct RecordingPresenter {
        shown: Rc<RefCell<Vec<Screen>>>,
    }

    impl ScreenPresenter for RecordingPresenter {
        async fn show(&self, screen: &Screen) -> Result<(), EngineError> {
            self.shown.borrow_mut().push(screen.clone());
            Ok(())
        }
    }

    fn small_config() -> ExperimentConfig {
        let mut config = ExperimentConfig::default();
        config.design = DesignConfig::factorial(SoaLevels::Millis(vec![-50.0, 50.0]), 1, 3);
        config.tutorial.trials = 4;
        config
    }

    /// Answers every response window with `key` until the hub goes quiet.
    async fn participant(hub: InputHub, key: &'static str, trials: usize) {
        let mut answered = 0;
        while answered < trials {
            if hub.active_listeners() > 0 {
                tokio::time::sleep(Duration::from_millis(300)).await;
                hub.dispatch(InputKind::Key(key.into()));
                answered += 1;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    type TestSession = Session<SilentAudio, NullSurface, TokioTimer, StdRng, RecordingPresenter, Vec<ResultRecord>>;

    fn session(config: ExperimentConfig, hub: InputHub, presenter: RecordingPresenter) -> TestSession {
        let engine = TojEngine::new(
            config,
            SilentAudio,
            NullSurface,
            hub,
            TokioTimer,
            StdRng::seed_from_u64(9),
        )
        .unwrap();
        Session::new(engine, presenter, Vec::new())
    }

    #[tokio::test(start_paused = true)]
    async fn tutorial_failure_ends_session() {
        let mut config = small_config();
        config.tutorial.design = DesignConfig::factorial(SoaLevels::Millis(vec![50.0]), 2, 100);
        let plan = SessionPlan::build(&config, &mut StdRng::seed_from_u64(1)).unwrap();
        let hub = InputHub::new();
        let presenter = RecordingPresenter::default();
        let mut session = session(config, hub.clone(), presenter.clone());

        // The reference always leads in this tutorial, so "first" is always wrong.
        let (outcome, ()) = tokio::join!(session.run(&plan), participant(hub, "q", 8));
        let outcome = outcome.unwrap();
        match outcome {
            SessionOutcome::TutorialFailed(t) => {
                assert_eq!(t.attempts, 2);
                assert!(!t.passed);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(session.phase(), SessionPhase::Tutorial);
        let shown = presenter.shown.borrow();
        assert!(matches!(shown.last(), Some(Screen::TutorialFailed { .. })));
        assert!(shown.iter().any(|s| matches!(s, Screen::TutorialRetry { .. })));
        assert!(session.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn completed_session_records_every_trial() {
        let mut config = small_config();
        config.design = DesignConfig::factorial(SoaLevels::Millis(vec![-50.0, -25.0]), 1, 3);
        config.tutorial.design = DesignConfig::factorial(SoaLevels::Millis(vec![-50.0]), 2, 100);
        let plan = SessionPlan::build(&config, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(plan.schedule.block_sizes(), vec![3, 3, 2]);
        assert!(plan.plan.short_final_block);
        let hub = InputHub::new();
        let presenter = RecordingPresenter::default();
        let mut session = session(config, hub.clone(), presenter.clone());

        // The probe always leads, so "first" is always right.
        let answers = 4 + plan.plan.trials.len();
        let (outcome, ()) = tokio::join!(session.run(&plan), participant(hub, "q", answers));
        let summary = match outcome.unwrap() {
            SessionOutcome::Completed(summary) => summary,
            other => panic!("unexpected outcome {other:?}"),
        };

        assert_eq!(
            *presenter.shown.borrow(),
            vec![
                Screen::Welcome,
                Screen::TutorialInstructions {
                    attempt: 1,
                    max_attempts: 2
                },
                Screen::TutorialPassed {
                    correct: 4,
                    total: 4
                },
                Screen::Pause {
                    block: 1,
                    block_count: 3
                },
                Screen::Pause {
                    block: 2,
                    block_count: 3
                },
                Screen::Final,
                Screen::Debrief { accuracy: 1.0 },
            ]
        );
        assert_eq!(session.phase(), SessionPhase::Debrief);
        assert_eq!(session.records().len(), plan.plan.trials.len());
        assert!(session.records().iter().all(|r| r.phase == SessionPhase::Experiment));

        assert_eq!(summary.trials, 8);
        assert_eq!(summary.correct, 8);
        assert_eq!(
            summary.by_soa,
            vec![
                SoaAccuracy {
                    soa: -50.0,
                    correct: 4,
                    total: 4
                },
                SoaAccuracy {
                    soa: -25.0,
                    correct: 4,
                    total: 4
                },
            ]
        );
        // Tutorial trials reach the sink but not the summary.
        assert_eq!(session.into_sink().len(), answers);
    }

    #[test]
    fn empty_summary_has_zero_accuracy() {
        let summary = SessionSummary::from_records(&[]);
        assert_eq!(summary.trials, 0);
        assert_eq!(summary.accuracy, 0.0);
        assert!(summary.by_soa.is_empty());
    }

    #[test]
    fn frame_alignment_warnings() {
        let mut config = small_config();
        config.design.soa = SoaLevels::Millis(vec![-50.0, 25.0, 33.333]);
        let plan = SessionPlan::build(&config, &mut StdRng::seed_from_u64(1)).unwrap();
        let misaligned = plan.misaligned_soas(&CalibrationStats::nominal(16.6667));
        assert_eq!(misaligned, vec![25.0]);
    }
}
