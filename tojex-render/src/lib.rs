pub mod render;
pub mod scene;

pub use render::{FrameStats, SceneRenderer};
pub use scene::{BarField, Flash, Scene, ScreenView, TrialView, Verdict};
