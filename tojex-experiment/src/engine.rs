use crate::condition::ConditionGenerator;
use crate::config::ExperimentConfig;
use crate::error::{ConfigError, EngineError};
use crate::host::{AudioCue, AudioPlayer, StimulusLease, StimulusSurface};
use crate::response::{first_settled, response_sources, Captured, InputHub};
use crate::trial::TrialTimeline;
use futures::future::{select, Either};
use rand::Rng;
use rand::seq::IndexedRandom;
use std::cell::{Cell, RefCell};
use std::pin::pin;
use std::time::Duration;
use tojex_core::{
    is_correct, Condition, Distractor, PairSlot, ResponseResult, ResultRecord, SessionPhase,
    TargetPair, TrialDescriptor, TrialState,
};
use tojex_timing::Timer;
use tracing::{debug, info, warn};

fn soa_duration(soa: f64) -> Duration {
    Duration::from_nanos((soa.abs() * 1_000_000.0).round() as u64)
}

/// Runs single TOJ trials: verbal instruction, fixation, two flashes at the
/// requested asynchrony, then the first response wins.
pub struct TojEngine<A, S, T, R>
where
    A: AudioPlayer,
    S: StimulusSurface,
    T: Timer,
    R: Rng,
{
    config: ExperimentConfig,
    generator: ConditionGenerator,
    audio: A,
    surface: S,
    hub: InputHub,
    timer: T,
    rng: R,
    state: Cell<TrialState>,
    transitions: RefCell<Vec<TrialState>>,
    last_timeline: Option<TrialTimeline>,
}

impl<A, S, T, R> TojEngine<A, S, T, R>
where
    A: AudioPlayer,
    S: StimulusSurface,
    T: Timer,
    R: Rng,
{
    pub fn new(
        config: ExperimentConfig,
        audio: A,
        surface: S,
        hub: InputHub,
        timer: T,
        rng: R,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let generator = ConditionGenerator::new(
            config.layout.clone(),
            &config.timing,
            config.design.soa_levels(),
        )?;
        Ok(Self {
            config,
            generator,
            audio,
            surface,
            hub,
            timer,
            rng,
            state: Cell::new(TrialState::Idle),
            transitions: RefCell::new(Vec::new()),
            last_timeline: None,
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn state(&self) -> TrialState {
        self.state.get()
    }

    /// States entered during the most recent trial.
    pub fn transitions(&self) -> Vec<TrialState> {
        self.transitions.borrow().clone()
    }

    pub fn last_timeline(&self) -> Option<&TrialTimeline> {
        self.last_timeline.as_ref()
    }

    pub fn hub(&self) -> &InputHub {
        &self.hub
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn audio(&self) -> &A {
        &self.audio
    }

    pub fn rng_mut(&mut self) -> &mut R {
        &mut self.rng
    }

    fn enter(&self, state: TrialState) {
        self.state.set(state);
        self.transitions.borrow_mut().push(state);
        debug!(?state, "trial state");
    }

    async fn play(&self, cue: &AudioCue, voice: &str) -> Result<(), EngineError> {
        let path = cue.path(&self.config.audio, voice);
        self.audio.play(cue, &path).await
    }

    /// Runs one trial to completion. Whatever happens, the stimulus lease and
    /// every input listener are released before this returns.
    pub async fn run_trial(
        &mut self,
        descriptor: &TrialDescriptor,
        phase: SessionPhase,
    ) -> Result<ResultRecord, EngineError> {
        self.transitions.borrow_mut().clear();
        self.enter(TrialState::Idle);
        let condition = self
            .generator
            .generate_condition(descriptor.probe_left, &mut self.rng);
        let voice = self
            .config
            .audio
            .voices
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_default();

        let outcome = self.run_stages(descriptor, phase, condition, voice).await;
        match outcome {
            Ok((record, timeline)) => {
                self.last_timeline = Some(timeline);
                Ok(record)
            }
            Err(err) => {
                warn!(trial = descriptor.trial_index, %err, "trial aborted");
                self.enter(TrialState::Finished);
                Err(err)
            }
        }
    }

    async fn run_stages(
        &self,
        descriptor: &TrialDescriptor,
        phase: SessionPhase,
        condition: Condition,
        voice: String,
    ) -> Result<(ResultRecord, TrialTimeline), EngineError> {
        let negated = descriptor.is_instruction_negated;
        let instruction_color = condition.instruction_color(negated).name();
        let play_feedback = phase.plays_feedback();
        debug!(
            trial = descriptor.trial_index,
            negated,
            soa = descriptor.soa,
            probe_left = descriptor.probe_left,
            color = instruction_color,
            %voice,
            "trial starting"
        );

        let lease = RefCell::new(self.surface.present(&condition)?);
        let mut timeline = TrialTimeline::new(self.timer.now());

        self.enter(TrialState::PlayingInstruction);
        self.play(&AudioCue::Polarity { negated }, &voice).await?;
        self.play(&AudioCue::Color(instruction_color), &voice).await?;

        self.enter(TrialState::Fixating);
        timeline.fixation_start = Some(self.timer.now());
        let captured = {
            let primary = pin!(self.present_and_capture(&condition, descriptor.soa, &lease, &mut timeline));
            match &condition.distractor {
                None => primary.await?,
                Some(distractor) => {
                    let background = pin!(self.flash_distractor(distractor, &lease));
                    match select(primary, background).await {
                        Either::Left((captured, _)) => captured?,
                        Either::Right(((), primary)) => primary.await?,
                    }
                }
            }
        };

        self.enter(TrialState::Scored);
        let answer = self.config.input.answer_for(captured.side);
        let responded_probe_first = answer.says_probe_first(descriptor.probe_side());
        let correct = is_correct(descriptor.soa, responded_probe_first);
        let rt = timeline
            .reaction_time()
            .map(|d| (d.as_secs_f64() * 1000.0).round() as u64)
            .unwrap_or_default();
        info!(
            trial = descriptor.trial_index,
            block = descriptor.block_index,
            ?answer,
            rt,
            correct,
            "trial scored"
        );

        drop(lease);
        if play_feedback {
            self.play(&AudioCue::Feedback { correct }, &voice).await?;
        }
        self.enter(TrialState::Finished);

        let record = ResultRecord {
            descriptor: descriptor.clone(),
            condition,
            phase,
            instruction_language: self.config.audio.language.clone(),
            instruction_voice: voice,
            instruction_color: instruction_color.to_string(),
            play_feedback,
            response: ResponseResult {
                answer,
                response_source: captured.source,
                response_key: captured.key,
                rt,
                correct,
            },
        };
        Ok((record, timeline))
    }

    async fn present_and_capture(
        &self,
        condition: &Condition,
        soa: f64,
        lease: &RefCell<S::Lease>,
        timeline: &mut TrialTimeline,
    ) -> Result<Captured, EngineError> {
        self.timer
            .sleep(Duration::from_millis(condition.fixation_ms()))
            .await;

        self.enter(TrialState::Modifying);
        let (first, second) = TargetPair::flash_order(soa);
        timeline.first_flash = Some(self.timer.now());
        lease.borrow_mut().flash(PairSlot::Primary, first);
        if soa != 0.0 {
            self.timer.sleep(soa_duration(soa)).await;
        }
        timeline.second_flash = Some(self.timer.now());
        lease.borrow_mut().flash(PairSlot::Primary, second);

        self.enter(TrialState::AwaitingResponse);
        let sources = response_sources(&self.config.input, &self.hub);
        timeline.response_window_open = Some(self.timer.now());
        let captured = first_settled(sources).await?;
        timeline.response = Some(captured.at);
        Ok(captured)
    }

    /// Flashes the distractor pair on its own clock. Never gates the trial.
    async fn flash_distractor(&self, distractor: &Distractor, lease: &RefCell<S::Lease>) {
        self.timer
            .sleep(Duration::from_millis(distractor.pair.fixation_ms))
            .await;
        let (first, second) = TargetPair::flash_order(distractor.soa);
        lease.borrow_mut().flash(PairSlot::Distractor, first);
        if distractor.soa != 0.0 {
            self.timer.sleep(soa_duration(distractor.soa)).await;
        }
        lease.borrow_mut().flash(PairSlot::Distractor, second);
    }
}
