pub mod timer;

pub use timer::{CalibrationStats, FrameRecorder, Timer, TokioTimer};
