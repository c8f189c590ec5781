//! Speaker output
//!
//! cpal output streams are not `Send`, so every play runs on its own OS
//! thread that builds, drives, and drops the stream; the async side awaits a
//! done signal over a oneshot. Two controls end playback early: the sink-wide
//! generation counter ([`CpalSink::stop`]) and a per-play halt flag set when
//! the play future is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use tokio::sync::oneshot;

use super::{AudioClip, AudioSink, HaltOnDrop};
use crate::{Error, Result};

/// How often the audio thread checks for completion or a halt
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Slack added to the expected clip duration before giving up on the device
const COMPLETION_SLACK: Duration = Duration::from_millis(500);

/// Plays clips through the default output device.
pub struct CpalSink {
    generation: Arc<AtomicU64>,
}

impl CpalSink {
    /// Probe the default output device so construction fails loudly on
    /// hosts without audio.
    ///
    /// # Errors
    ///
    /// Returns `Audio` when no output device is available.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio output initialized"
        );

        Ok(Self {
            generation: Arc::new(AtomicU64::new(0)),
        })
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn play(&self, clip: &AudioClip) -> Result<()> {
        if clip.is_empty() {
            return Ok(());
        }

        let halt = Arc::new(AtomicBool::new(false));
        let _guard = HaltOnDrop(Arc::clone(&halt));
        let generation = Arc::clone(&self.generation);
        let snapshot = generation.load(Ordering::Acquire);

        let samples = clip.samples.clone();
        let sample_rate = clip.sample_rate;
        let (done_tx, done_rx) = oneshot::channel();

        std::thread::spawn(move || {
            let outcome = drive_stream(samples, sample_rate, &halt, &generation, snapshot);
            let _ = done_tx.send(outcome);
        });

        done_rx
            .await
            .map_err(|_| Error::Playback("audio thread exited unexpectedly".to_string()))?
    }

    fn stop(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

/// Build an output stream for the clip and block until it finishes, the halt
/// flag is raised, or the sink generation moves on.
fn drive_stream(
    samples: Vec<f32>,
    sample_rate: u32,
    halt: &AtomicBool,
    generation: &AtomicU64,
    snapshot: u64,
) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Playback("no output device".to_string()))?;
    let config = output_config(&device, sample_rate)?;
    let channels = usize::from(config.channels);

    let total = samples.len();
    let finished = Arc::new(AtomicBool::new(false));
    let finished_cb = Arc::clone(&finished);
    let mut pos = 0usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = if pos < samples.len() {
                        let s = samples[pos];
                        pos += 1;
                        s
                    } else {
                        finished_cb.store(true, Ordering::Release);
                        0.0
                    };
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio output error");
            },
            None,
        )
        .map_err(|e| Error::Playback(e.to_string()))?;

    stream.play().map_err(|e| Error::Playback(e.to_string()))?;

    let expected_ms = total as u64 * 1000 / u64::from(sample_rate.max(1));
    let deadline = Instant::now() + Duration::from_millis(expected_ms) + COMPLETION_SLACK;

    let mut halted = false;
    loop {
        if finished.load(Ordering::Acquire) {
            break;
        }
        if halt.load(Ordering::Acquire) || generation.load(Ordering::Acquire) != snapshot {
            halted = true;
            break;
        }
        if Instant::now() > deadline {
            tracing::warn!(samples = total, "output device never drained the clip");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    if !halted {
        // Let the device ring buffer empty before tearing the stream down.
        std::thread::sleep(Duration::from_millis(50));
    }

    drop(stream);
    tracing::trace!(samples = total, halted, "playback finished");
    Ok(())
}

/// Find an output configuration carrying the clip's sample rate, preferring
/// mono, falling back to any channel count.
fn output_config(device: &Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let mut fallback = None;

    let configs = device
        .supported_output_configs()
        .map_err(|e| Error::Playback(e.to_string()))?;
    for candidate in configs {
        if candidate.min_sample_rate() > rate || candidate.max_sample_rate() < rate {
            continue;
        }
        if candidate.channels() == 1 {
            return Ok(candidate.with_sample_rate(rate).config());
        }
        fallback.get_or_insert(candidate);
    }

    fallback
        .map(|c| c.with_sample_rate(rate).config())
        .ok_or_else(|| {
            Error::Playback(format!("no output config supports {sample_rate} Hz"))
        })
}
