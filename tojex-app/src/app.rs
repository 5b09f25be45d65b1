use crate::audio::{AudioOutput, CuePlayer};
use crate::cli::Args;
use crate::host::{CONTINUE_KEY, JsonResultLog, SceneSurface, ScreenGate, SharedScene};
use anyhow::{anyhow, Context, Result};
use pixels::{Pixels, SurfaceTexture};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tojex_experiment::{
    audit, ExperimentConfig, InputHub, InputKind, Session, SessionOutcome, SessionPlan, TojEngine,
};
use tojex_render::SceneRenderer;
use tojex_timing::{FrameRecorder, TokioTimer};
use tracing::{error, info, trace, warn};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, MouseButton, TouchPhase, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Fullscreen, Window, WindowId},
};

/// Frames sampled before the display timing is reported.
const CALIBRATION_FRAMES: usize = 300;

/// Everything the engine thread needs. Moved onto that thread once the
/// window exists.
struct Worker {
    config: ExperimentConfig,
    plan: SessionPlan,
    scene: SharedScene,
    hub: InputHub,
    seed: u64,
    cue_fallback: Duration,
}

impl Worker {
    fn run(self) -> Result<SessionOutcome> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .context("building engine runtime")?;
        let grid = (self.config.layout.grid.x, self.config.layout.grid.y);
        let results = self.config.output.results_path.clone();
        let surface = SceneSurface::new(
            self.scene.clone(),
            grid,
            StdRng::seed_from_u64(self.seed.wrapping_add(2)),
        );
        // The stream is tied to this thread, so it is opened here.
        let output = AudioOutput::open()
            .inspect_err(|e| warn!(error = ?e, "no audio output, cues will be silent"))
            .ok();
        let engine = TojEngine::new(
            self.config,
            CuePlayer::new(output, self.cue_fallback),
            surface,
            self.hub.clone(),
            TokioTimer,
            StdRng::seed_from_u64(self.seed.wrapping_add(1)),
        )?;
        info!(path = %results.display(), "writing results");
        let mut session = Session::new(
            engine,
            ScreenGate::new(self.scene, self.hub),
            JsonResultLog::new(results),
        );
        let outcome = runtime.block_on(session.run(&self.plan))?;
        info!(records = session.into_sink().record_count(), "results saved");
        Ok(outcome)
    }

    fn spawn(self, finished: Arc<AtomicBool>) -> Result<()> {
        std::thread::Builder::new()
            .name("tojex-engine".into())
            .spawn(move || {
                match self.run() {
                    Ok(SessionOutcome::Completed(summary)) => info!(
                        trials = summary.trials,
                        accuracy = summary.accuracy,
                        mean_rt_ms = summary.mean_rt_ms,
                        "experiment completed"
                    ),
                    Ok(SessionOutcome::TutorialFailed(tutorial)) => info!(
                        attempts = tutorial.attempts,
                        correct = tutorial.correct,
                        required = tutorial.required,
                        "participant did not pass the tutorial"
                    ),
                    Err(e) => error!(error = ?e, "session aborted"),
                }
                finished.store(true, Ordering::Release);
            })
            .context("spawning engine thread")?;
        Ok(())
    }
}

pub struct App {
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    renderer: Option<SceneRenderer>,
    grid: (u32, u32),
    flash_for: Duration,
    plan: SessionPlan,
    scene: SharedScene,
    hub: InputHub,
    worker: Option<Worker>,
    finished: Arc<AtomicBool>,
    frames: FrameRecorder,
    calibrated: bool,
    refresh_rate: Option<f64>,
    cursor_x: f32,
    should_exit: bool,
}

impl App {
    pub fn new(args: &Args) -> Result<Self> {
        let config = args.experiment_config()?;
        let seed = args.seed.unwrap_or_else(rand::random);
        let plan = SessionPlan::build(&config, &mut StdRng::seed_from_u64(seed))?;

        let balance = audit(&plan.plan.trials);
        info!(
            seed,
            trials = plan.plan.trials.len(),
            blocks = plan.plan.block_count,
            overflow_trials = plan.plan.overflow_trials,
            short_final_block = plan.plan.short_final_block,
            rank_balanced = balance.is_rank_balanced(),
            "trial plan ready"
        );
        for ((negated, length), count) in &balance.segments {
            info!(negated, length, count, "polarity runs");
        }

        let scene = SharedScene::default();
        let hub = InputHub::new();
        let worker = Worker {
            config: config.clone(),
            plan: plan.clone(),
            scene: scene.clone(),
            hub: hub.clone(),
            seed,
            cue_fallback: Duration::from_millis(args.cue_ms),
        };

        Ok(Self {
            window: None,
            pixels: None,
            renderer: None,
            grid: (config.layout.grid.x, config.layout.grid.y),
            flash_for: Duration::from_millis(config.timing.flash_ms),
            plan,
            scene,
            hub,
            worker: Some(worker),
            finished: Arc::new(AtomicBool::new(false)),
            frames: FrameRecorder::new(CALIBRATION_FRAMES),
            calibrated: false,
            refresh_rate: None,
            cursor_x: 0.0,
            should_exit: false,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        info!(
            platform = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            "press SPACE to continue, ESC to quit"
        );
        event_loop.run_app(&mut self)?;
        Ok(())
    }

    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let primary_monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
            .ok_or_else(|| anyhow!("no monitor available"))?;

        self.refresh_rate = primary_monitor
            .refresh_rate_millihertz()
            .map(|rate| rate as f64 / 1000.0);

        let window_attributes = Window::default_attributes()
            .with_title("tojex")
            .with_fullscreen(Some(Fullscreen::Borderless(Some(primary_monitor))))
            .with_resizable(false);

        let window = Arc::new(event_loop.create_window(window_attributes)?);
        let size = window.inner_size();
        info!(
            width = size.width,
            height = size.height,
            scale_factor = window.scale_factor(),
            refresh_hz = self.refresh_rate,
            "display"
        );

        let surface_texture = SurfaceTexture::new(size.width, size.height, window.clone());
        self.pixels = Some(Pixels::new(size.width, size.height, surface_texture)?);
        self.renderer = Some(SceneRenderer::new(
            size.width,
            size.height,
            self.grid,
            self.flash_for,
        )?);

        window.set_cursor_visible(false);
        window.request_redraw();
        self.window = Some(window);

        if let Some(worker) = self.worker.take() {
            worker.spawn(Arc::clone(&self.finished))?;
        }
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        let (Some(pixels), Some(renderer)) = (self.pixels.as_mut(), self.renderer.as_mut()) else {
            return Ok(());
        };
        let scene = self.scene.lock().clone();
        let stats = renderer.render(&scene, Instant::now(), pixels.frame_mut())?;
        pixels.render()?;
        self.frames.tick(Instant::now());
        trace!(
            draw_ms = stats.draw.as_secs_f64() * 1e3,
            copy_ms = stats.copy.as_secs_f64() * 1e3,
            "frame"
        );

        if !self.calibrated && self.frames.frame_count() >= CALIBRATION_FRAMES {
            self.report_calibration();
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
        Ok(())
    }

    fn report_calibration(&mut self) {
        self.calibrated = true;
        let stats = self.frames.calibration_stats();
        info!(
            frame_ms = stats.average_frame_ms(),
            jitter_ms = stats.jitter_ns / 1e6,
            fps = stats.effective_fps,
            monitor_hz = self.refresh_rate,
            "display timing"
        );
        let misaligned = self.plan.misaligned_soas(&stats);
        if !misaligned.is_empty() {
            warn!(count = misaligned.len(), "SOAs will be rounded to whole frames");
        }
    }

    fn handle_key(&mut self, key: &Key, event_loop: &ActiveEventLoop) {
        let name = match key {
            Key::Named(NamedKey::Escape) => return self.exit(event_loop),
            Key::Named(NamedKey::Space) => CONTINUE_KEY.to_string(),
            Key::Character(c) => c.to_lowercase(),
            _ => return,
        };
        self.hub.dispatch(InputKind::Key(name));
    }

    fn handle_touch(&mut self, x: f32, pressed: bool) {
        let Some(side) = self.renderer.as_ref().map(|r| r.side_at(x)) else {
            return;
        };
        self.hub.dispatch(if pressed {
            InputKind::TouchStart(side)
        } else {
            InputKind::TouchEnd(side)
        });
    }

    fn handle_resize(&mut self, new_size: PhysicalSize<u32>) {
        if let Some(pixels) = &mut self.pixels {
            if let Err(e) = pixels.resize_surface(new_size.width, new_size.height) {
                warn!(error = %e, "failed to resize surface");
            }
            if let Err(e) = pixels.resize_buffer(new_size.width, new_size.height) {
                warn!(error = %e, "failed to resize buffer");
            }
        }
        if let Some(renderer) = &mut self.renderer {
            if let Err(e) = renderer.resize(new_size.width, new_size.height) {
                warn!(error = %e, "failed to resize canvas");
            }
        }
        info!(width = new_size.width, height = new_size.height, "display resized");
    }

    fn exit(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.set_cursor_visible(true);
        }
        self.should_exit = true;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_surface(event_loop) {
                error!(error = ?e, "failed to create window and surface");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.exit(event_loop),
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render() {
                    error!(error = ?e, "render failed");
                    self.exit(event_loop);
                }
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state.is_pressed() && !event.repeat =>
            {
                self.handle_key(&event.logical_key, event_loop);
            }
            WindowEvent::CursorMoved { position, .. } => self.cursor_x = position.x as f32,
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => self.handle_touch(self.cursor_x, state == ElementState::Pressed),
            WindowEvent::Touch(touch) => match touch.phase {
                TouchPhase::Started => self.handle_touch(touch.location.x as f32, true),
                TouchPhase::Ended | TouchPhase::Cancelled => {
                    self.handle_touch(touch.location.x as f32, false)
                }
                TouchPhase::Moved => {}
            },
            WindowEvent::Resized(size) => self.handle_resize(size),
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(window) = &self.window {
                    let size = window.inner_size();
                    self.handle_resize(size);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.finished.load(Ordering::Acquire) {
            info!("session over, closing");
            self.should_exit = true;
        }
        if self.should_exit {
            event_loop.exit();
        }
    }
}

