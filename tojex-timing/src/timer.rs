use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic clock the trial engine measures and waits with.
pub trait Timer: Clone {
    fn now(&self) -> Instant;

    fn elapsed(&self, since: Instant) -> Duration {
        self.now().saturating_duration_since(since)
    }

    fn sleep(&self, d: Duration) -> impl Future<Output = ()>;
}

/// Timer backed by the tokio clock, so a paused test runtime drives it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) -> impl Future<Output = ()> {
        tokio::time::sleep(d)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationStats {
    pub average_frame_time_ns: f64,
    pub jitter_ns: f64,
    pub min_frame_time_ns: f64,
    pub max_frame_time_ns: f64,
    pub effective_fps: f64,
}

impl CalibrationStats {
    fn empty() -> Self {
        CalibrationStats {
            average_frame_time_ns: 0.0,
            jitter_ns: 0.0,
            min_frame_time_ns: 0.0,
            max_frame_time_ns: 0.0,
            effective_fps: 0.0,
        }
    }

    /// Stats of an ideal display refreshing every `frame_ms`.
    pub fn nominal(frame_ms: f64) -> Self {
        let frame_ns = frame_ms * 1_000_000.0;
        CalibrationStats {
            average_frame_time_ns: frame_ns,
            jitter_ns: 0.0,
            min_frame_time_ns: frame_ns,
            max_frame_time_ns: frame_ns,
            effective_fps: if frame_ns > 0.0 { 1e9 / frame_ns } else { 0.0 },
        }
    }

    pub fn average_frame_ms(&self) -> f64 {
        self.average_frame_time_ns / 1_000_000.0
    }

    /// Distance in ms between `soa_ms` and the nearest whole number of
    /// frames. Zero when nothing was measured yet.
    pub fn frame_misalignment_ms(&self, soa_ms: f64) -> f64 {
        let frame = self.average_frame_ms();
        if frame <= 0.0 {
            return 0.0;
        }
        let frames = (soa_ms.abs() / frame).round();
        (soa_ms.abs() - frames * frame).abs()
    }
}

/// Sliding window of presented-frame intervals.
#[derive(Debug, Clone)]
pub struct FrameRecorder {
    frame_times: VecDeque<Duration>,
    max_samples: usize,
    last_frame: Option<std::time::Instant>,
}

impl FrameRecorder {
    pub fn new(max_samples: usize) -> Self {
        Self {
            frame_times: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
            last_frame: None,
        }
    }

    /// Records the interval since the previous call.
    pub fn tick(&mut self, now: std::time::Instant) {
        if let Some(last) = self.last_frame.replace(now) {
            self.record_frame(now.saturating_duration_since(last));
        }
    }

    pub fn record_frame(&mut self, d: Duration) {
        if self.frame_times.len() >= self.max_samples {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(d);
    }

    pub fn frame_count(&self) -> usize {
        self.frame_times.len()
    }

    pub fn calibration_stats(&self) -> CalibrationStats {
        if self.frame_times.is_empty() {
            return CalibrationStats::empty();
        }
        let times: Vec<f64> = self
            .frame_times
            .iter()
            .map(|d| d.as_nanos() as f64)
            .collect();
        let avg = times.iter().sum::<f64>() / times.len() as f64;
        let var = times.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / times.len() as f64;
        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        CalibrationStats {
            average_frame_time_ns: avg,
            jitter_ns: var.sqrt(),
            min_frame_time_ns: min,
            max_frame_time_ns: max,
            effective_fps: if avg > 0.0 { 1e9 / avg } else { 0.0 },
        }
    }
}

impl Default for FrameRecorder {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_follows_paused_clock() {
        let timer = TokioTimer;
        let start = timer.now();
        timer.sleep(Duration::from_millis(350)).await;
        assert_eq!(timer.elapsed(start), Duration::from_millis(350));
    }

    #[test]
    fn stats_of_steady_60hz() {
        let mut rec = FrameRecorder::new(10);
        for _ in 0..20 {
            rec.record_frame(Duration::from_nanos(16_666_667));
        }
        assert_eq!(rec.frame_count(), 10);
        let stats = rec.calibration_stats();
        assert!((stats.effective_fps - 60.0).abs() < 0.01);
        assert!(stats.jitter_ns < 1.0);
        assert!(stats.frame_misalignment_ms(50.0) < 0.01);
        assert!(stats.frame_misalignment_ms(25.0) > 8.0);
    }

    #[test]
    fn nominal_sixty_hertz() {
        let stats = CalibrationStats::nominal(16.6667);
        assert!((stats.effective_fps - 60.0).abs() < 0.01);
        assert!(stats.frame_misalignment_ms(-66.667) < 0.01);
    }

    #[test]
    fn empty_recorder_reports_zero() {
        let rec = FrameRecorder::default();
        let stats = rec.calibration_stats();
        assert_eq!(stats.effective_fps, 0.0);
        assert_eq!(stats.frame_misalignment_ms(33.0), 0.0);
    }

    #[test]
    fn tick_measures_intervals() {
        let mut rec = FrameRecorder::new(4);
        let t0 = std::time::Instant::now();
        rec.tick(t0);
        rec.tick(t0 + Duration::from_millis(10));
        rec.tick(t0 + Duration::from_millis(30));
        let stats = rec.calibration_stats();
        assert_eq!(rec.frame_count(), 2);
        assert_eq!(stats.min_frame_time_ns, 10_000_000.0);
        assert_eq!(stats.max_frame_time_ns, 20_000_000.0);
    }
}
