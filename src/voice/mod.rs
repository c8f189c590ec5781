//! Audio collaborators
//!
//! The decoded clip type every synthesizer produces and playback consumes,
//! the output-sink and recognition-session traits, microphone capture, and
//! shared decoding helpers. Device-facing implementations live in the
//! submodules; the pipeline itself only sees the traits.

mod capture;
mod output;
mod recognition;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use output::CpalSink;
pub use recognition::{MicRecognizer, RecognitionSession};

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::{Error, Result};

/// Decoded mono audio, ready for an output device.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Samples normalized to `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Samples per second
    pub sample_rate: u32,
}

impl AudioClip {
    /// Playback length of the clip.
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let millis = self.samples.len() as u64 * 1000 / u64::from(self.sample_rate);
        Duration::from_millis(millis)
    }

    /// True when the clip holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Audio output collaborator.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play a clip to completion.
    ///
    /// Cancel-safe: dropping the returned future stops playback promptly.
    ///
    /// # Errors
    ///
    /// Returns `Playback` if the output device refuses the clip.
    async fn play(&self, clip: &AudioClip) -> Result<()>;

    /// Halt the in-flight play immediately, if any. Safe to call when idle.
    fn stop(&self);
}

/// Sets its flag when dropped, so abandoning an async operation halts the
/// audio thread backing it.
pub(crate) struct HaltOnDrop(pub(crate) Arc<AtomicBool>);

impl Drop for HaltOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Decode MP3 bytes into a mono clip.
///
/// Stereo frames are averaged down to mono; the sample rate is taken from the
/// first frame.
///
/// # Errors
///
/// Returns `Audio` if the payload is not decodable MP3.
pub fn decode_mp3(data: &[u8]) -> Result<AudioClip> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate.is_none() {
                    let rate = u32::try_from(frame.sample_rate)
                        .map_err(|_| Error::Audio("negative MP3 sample rate".to_string()))?;
                    sample_rate = Some(rate);
                }

                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|pair| {
                        let left = f32::from(pair[0]) / 32768.0;
                        let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    let sample_rate =
        sample_rate.ok_or_else(|| Error::Audio("MP3 payload held no frames".to_string()))?;
    Ok(AudioClip {
        samples,
        sample_rate,
    })
}
