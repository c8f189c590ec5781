//! Speech recognition session
//!
//! Captures one utterance from the microphone with energy-based endpointing,
//! then transcribes it through an OpenAI-compatible transcription endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::HostTrait;
use tokio::sync::{mpsc, oneshot};

use super::HaltOnDrop;
use super::capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
use crate::{Error, Result};

/// RMS energy above which a chunk counts as speech
const ENERGY_THRESHOLD: f32 = 0.015;

/// Minimum utterance length before trailing silence may close it (0.3 s at 16 kHz)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Trailing silence that closes an utterance (0.7 s at 16 kHz)
const END_SILENCE_SAMPLES: usize = 11_200;

/// Give up when nothing is heard for this long
const NO_SPEECH_TIMEOUT: Duration = Duration::from_secs(8);

/// Hard cap on a single utterance
const MAX_UTTERANCE: Duration = Duration::from_secs(30);

/// Capture poll cadence
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Speech recognition collaborator.
///
/// At most one session runs at a time; the turn coordinator enforces this.
#[async_trait]
pub trait RecognitionSession: Send + Sync {
    /// Whether recognition can work on this host at all.
    fn is_supported(&self) -> bool;

    /// Listen for one utterance and resolve to its final transcript.
    ///
    /// Interim hypotheses, when the backend produces any, are sent on
    /// `interim`. Dropping the returned future cancels the session and
    /// releases the microphone.
    ///
    /// # Errors
    ///
    /// `RecognitionUnavailable` when no usable input path exists,
    /// `PermissionDenied` when the microphone is refused, `NoSpeech` when the
    /// listening window closes without an utterance, and `Network` for
    /// transcription transport failures.
    async fn listen(&self, interim: mpsc::UnboundedSender<String>) -> Result<String>;
}

/// Microphone-backed recognition: local endpointing, remote transcription.
pub struct MicRecognizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    language: Option<String>,
}

impl MicRecognizer {
    /// Create a recognizer against an OpenAI-compatible transcription API.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the HTTP client cannot be constructed.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            language: None,
        })
    }

    /// Pin the transcription language (ISO-639-1), improving accuracy.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "transcribing utterance");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("utterance.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::RecognitionUnavailable(e.to_string()))?,
            )
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let url = format!(
            "{}/v1/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    Error::Network(e.to_string())
                } else {
                    Error::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RecognitionUnavailable(format!(
                "transcription failed ({status}): {body}"
            )));
        }

        let parsed: TranscriptionResponse = response.json().await?;
        tracing::info!(transcript = %parsed.text, "transcription complete");
        Ok(parsed.text)
    }
}

#[async_trait]
impl RecognitionSession for MicRecognizer {
    fn is_supported(&self) -> bool {
        cpal::default_host().default_input_device().is_some()
    }

    async fn listen(&self, _interim: mpsc::UnboundedSender<String>) -> Result<String> {
        // Batch transcription yields no interim hypotheses.
        let halt = Arc::new(AtomicBool::new(false));
        let _guard = HaltOnDrop(Arc::clone(&halt));
        let halt_thread = Arc::clone(&halt);

        let (tx, rx) = oneshot::channel();
        std::thread::spawn(move || {
            let _ = tx.send(capture_utterance(&halt_thread));
        });

        let samples = rx
            .await
            .map_err(|_| Error::RecognitionUnavailable("capture thread exited".to_string()))??;
        if samples.len() < MIN_SPEECH_SAMPLES {
            return Err(Error::NoSpeech);
        }

        let wav = samples_to_wav(&samples, SAMPLE_RATE)?;
        self.transcribe(wav).await
    }
}

/// Record until an utterance ends: speech above the energy threshold followed
/// by enough trailing silence. Runs on its own thread because the cpal stream
/// must stay on one thread.
fn capture_utterance(halt: &AtomicBool) -> Result<Vec<f32>> {
    let mut capture = AudioCapture::new()?;
    capture.start()?;

    let started = Instant::now();
    let mut utterance: Vec<f32> = Vec::new();
    let mut speech_started = false;
    let mut silence_samples = 0usize;

    loop {
        if halt.load(Ordering::Acquire) {
            capture.stop();
            return Err(Error::NoSpeech);
        }

        std::thread::sleep(POLL_INTERVAL);
        let chunk = capture.take_buffer();

        if !chunk.is_empty() {
            let speaking = rms(&chunk) > ENERGY_THRESHOLD;
            if speaking {
                if !speech_started {
                    speech_started = true;
                    tracing::debug!("speech started");
                }
                silence_samples = 0;
            } else if speech_started {
                silence_samples += chunk.len();
            }

            if speech_started {
                utterance.extend_from_slice(&chunk);
            }
        }

        if speech_started
            && utterance.len() >= MIN_SPEECH_SAMPLES
            && silence_samples >= END_SILENCE_SAMPLES
        {
            tracing::debug!(samples = utterance.len(), "utterance complete");
            break;
        }
        if !speech_started && started.elapsed() > NO_SPEECH_TIMEOUT {
            capture.stop();
            return Err(Error::NoSpeech);
        }
        if started.elapsed() > MAX_UTTERANCE {
            tracing::debug!(samples = utterance.len(), "utterance hit length cap");
            break;
        }
    }

    capture.stop();
    Ok(utterance)
}

/// RMS energy of a sample chunk.
#[allow(clippy::cast_precision_loss)]
fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}
