//! Cue playback through the default output device.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tojex_experiment::{AudioCue, AudioPlayer, EngineError};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Extra time a cue may take beyond its length before playback is
/// considered stalled.
const STALL_GRACE: Duration = Duration::from_millis(500);

/// A decoded cue, mixed down to mono.
#[derive(Debug, Clone)]
pub struct CueClip {
    samples: Vec<f32>,
    sample_rate: u32,
    duration: Duration,
}

impl CueClip {
    pub fn open(path: &Path) -> Result<Self, hound::Error> {
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            return Err(hound::Error::FormatError("zero sample rate"));
        }
        let frames = reader.duration();
        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            SampleFormat::Int => {
                let scale = 1.0 / (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 * scale))
                    .collect::<Result<_, _>>()?
            }
        };
        let channels = usize::from(spec.channels.max(1));
        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
            duration: Duration::from_secs_f64(frames as f64 / spec.sample_rate as f64),
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Linear resampling to the device rate.
    pub fn resampled(&self, rate: u32) -> Vec<f32> {
        if rate == self.sample_rate || self.samples.is_empty() || rate == 0 {
            return self.samples.clone();
        }
        let step = self.sample_rate as f64 / rate as f64;
        let len = (self.samples.len() as f64 / step).round() as usize;
        let last = self.samples.len() - 1;
        (0..len)
            .map(|i| {
                let at = i as f64 * step;
                let idx = (at.floor() as usize).min(last);
                let frac = (at - idx as f64) as f32;
                let a = self.samples[idx];
                let b = self.samples[(idx + 1).min(last)];
                a + (b - a) * frac
            })
            .collect()
    }
}

struct Playback {
    samples: Vec<f32>,
    pos: usize,
    done: oneshot::Sender<()>,
}

type Slot = Arc<Mutex<Option<Playback>>>;

/// Copies the current cue into one device buffer, the same mono sample on
/// every channel of a frame. Signals `done` once the cue runs out.
fn fill(current: &Mutex<Option<Playback>>, data: &mut [f32], channels: usize) {
    data.fill(0.0);
    let Ok(mut slot) = current.try_lock() else {
        return;
    };
    let finished = match slot.as_mut() {
        Some(playback) => {
            for frame in data.chunks_mut(channels.max(1)) {
                let Some(&sample) = playback.samples.get(playback.pos) else {
                    break;
                };
                frame.fill(sample);
                playback.pos += 1;
            }
            playback.pos >= playback.samples.len()
        }
        None => false,
    };
    if finished {
        if let Some(playback) = slot.take() {
            let _ = playback.done.send(());
        }
    }
}

/// An open output stream. The stream stays on the thread that opened it.
pub struct AudioOutput {
    _stream: cpal::Stream,
    sample_rate: u32,
    current: Slot,
}

impl AudioOutput {
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no output device"))?;
        let supported = device
            .default_output_config()
            .context("querying output config")?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let current: Slot = Arc::default();
        let slot = Arc::clone(&current);
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    fill(&slot, data, usize::from(channels))
                },
                |err| error!(error = %err, "audio stream error"),
                None,
            )
            .context("building output stream")?;
        stream.play().context("starting output stream")?;
        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate, channels, "audio output"
        );

        Ok(Self {
            _stream: stream,
            sample_rate,
            current,
        })
    }

    fn slot(&self) -> MutexGuard<'_, Option<Playback>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Plays a clip and resolves once the device has consumed all of it.
    pub async fn play(&self, clip: &CueClip) -> Result<(), EngineError> {
        let (done, finished) = oneshot::channel();
        *self.slot() = Some(Playback {
            samples: clip.resampled(self.sample_rate),
            pos: 0,
            done,
        });
        match tokio::time::timeout(clip.duration() + STALL_GRACE, finished).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(EngineError::Audio("cue playback was interrupted".into())),
            Err(_) => {
                *self.slot() = None;
                warn!(ms = clip.duration().as_millis() as u64, "cue playback stalled");
                Ok(())
            }
        }
    }
}

/// Plays each cue's WAV asset. Without an output device the cue's length is
/// waited out silently, and an unreadable asset waits `fallback`.
pub struct CuePlayer {
    output: Option<AudioOutput>,
    fallback: Duration,
}

impl CuePlayer {
    pub fn new(output: Option<AudioOutput>, fallback: Duration) -> Self {
        Self { output, fallback }
    }
}

impl AudioPlayer for CuePlayer {
    async fn play(&self, cue: &AudioCue, path: &Path) -> Result<(), EngineError> {
        let clip = match CueClip::open(path) {
            Ok(clip) => clip,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "audio asset unreadable");
                tokio::time::sleep(self.fallback).await;
                return Ok(());
            }
        };
        debug!(cue = cue.token(), ms = clip.duration().as_millis() as u64, "cue");
        match &self.output {
            Some(output) => output.play(&clip).await,
            None => {
                tokio::time::sleep(clip.duration()).await;
                Ok(())
            }
        }
    }
}
