//! Desktop implementations of the engine's host seams.

use futures::future::{select, Either};
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tojex_core::{Condition, PairSlot, ResultRecord, Role};
use tojex_experiment::{
    EngineError, InputFilter, InputHub, ResultSink, Screen, ScreenPresenter, StimulusLease,
    StimulusSurface,
};
use tojex_render::{Scene, ScreenView, TrialView, Verdict};
use tracing::info;

/// Key name the app dispatches for the space bar.
pub const CONTINUE_KEY: &str = "space";

/// The scene shared between the engine thread and the render loop.
#[derive(Clone, Default)]
pub struct SharedScene(Arc<Mutex<Scene>>);

impl SharedScene {
    pub fn lock(&self) -> MutexGuard<'_, Scene> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, scene: Scene) {
        *self.lock() = scene;
    }
}

/// Puts trial stimuli into the shared scene.
pub struct SceneSurface {
    scene: SharedScene,
    grid: (u32, u32),
    rng: RefCell<StdRng>,
}

impl SceneSurface {
    pub fn new(scene: SharedScene, grid: (u32, u32), rng: StdRng) -> Self {
        Self {
            scene,
            grid,
            rng: RefCell::new(rng),
        }
    }
}

impl StimulusSurface for SceneSurface {
    type Lease = SceneLease;

    fn present(&self, condition: &Condition) -> Result<SceneLease, EngineError> {
        let view = TrialView::new(condition.clone(), self.grid, &mut *self.rng.borrow_mut());
        self.scene.set(Scene::Trial(view));
        Ok(SceneLease {
            scene: self.scene.clone(),
        })
    }
}

pub struct SceneLease {
    scene: SharedScene,
}

impl StimulusLease for SceneLease {
    fn flash(&mut self, slot: PairSlot, role: Role) {
        if let Scene::Trial(view) = &mut *self.scene.lock() {
            view.flash(slot, role, Instant::now());
        }
    }
}

impl Drop for SceneLease {
    fn drop(&mut self) {
        self.scene.set(Scene::Blank);
    }
}

pub fn screen_view(screen: &Screen) -> ScreenView {
    match *screen {
        Screen::Welcome => ScreenView::Welcome,
        Screen::TutorialInstructions {
            attempt,
            max_attempts,
        } => ScreenView::Instructions {
            attempt,
            max_attempts,
        },
        Screen::TutorialPassed { correct, total } => ScreenView::Verdict {
            verdict: Verdict::Passed,
            correct,
            total,
        },
        Screen::TutorialRetry { correct, total, .. } => ScreenView::Verdict {
            verdict: Verdict::Retry,
            correct,
            total,
        },
        Screen::TutorialFailed { correct, total, .. } => ScreenView::Verdict {
            verdict: Verdict::Failed,
            correct,
            total,
        },
        Screen::Pause { block, block_count } => ScreenView::Progress {
            done: block,
            total: block_count,
        },
        Screen::Final => ScreenView::Progress { done: 1, total: 1 },
        Screen::Debrief { accuracy } => ScreenView::Summary { accuracy },
    }
}

/// Shows a screen until space is pressed or a finger goes down.
#[derive(Clone)]
pub struct ScreenGate {
    scene: SharedScene,
    hub: InputHub,
}

impl ScreenGate {
    pub fn new(scene: SharedScene, hub: InputHub) -> Self {
        Self { scene, hub }
    }
}

impl ScreenPresenter for ScreenGate {
    async fn show(&self, screen: &Screen) -> Result<(), EngineError> {
        info!(?screen, "screen");
        self.scene.set(Scene::Screen(screen_view(screen)));
        let mut key = self.hub.subscribe(InputFilter::Key(CONTINUE_KEY.into()));
        let mut touch = self.hub.subscribe(InputFilter::AnyTouchStart);
        let pressed = match select(pin!(key.next()), pin!(touch.next())).await {
            Either::Left((event, _)) | Either::Right((event, _)) => event,
        };
        self.scene.set(Scene::Blank);
        pressed.map(|_| ()).ok_or(EngineError::InputClosed)
    }
}

/// Keeps every record and rewrites the JSON array after each one, so an
/// interrupted session still leaves its results on disk.
pub struct JsonResultLog {
    path: PathBuf,
    records: Vec<ResultRecord>,
}

impl JsonResultLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            records: Vec::new(),
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

impl ResultSink for JsonResultLog {
    fn record(&mut self, record: &ResultRecord) -> std::io::Result<()> {
        self.records.push(record.clone());
        let file = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(file, &self.records)?;
        Ok(())
    }
}
