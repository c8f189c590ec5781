//! Local fallback synthesis through a command-line speech engine

use async_trait::async_trait;

use super::SpeechSynthesizer;
use crate::voice::AudioClip;
use crate::{Error, Result};

/// Engines probed in order of preference.
const ENGINES: [&str; 3] = ["espeak-ng", "espeak", "say"];

/// Synthesizes speech by shelling out to an installed speech engine.
///
/// Output quality is robotic but the engine works offline, which is exactly
/// what a network-outage fallback needs.
pub struct CommandSynthesizer {
    program: String,
    language: Option<String>,
}

impl CommandSynthesizer {
    /// Locate a usable speech engine on this host.
    ///
    /// # Errors
    ///
    /// Returns `FallbackUnavailable` when none of the known engines is
    /// installed.
    pub fn discover() -> Result<Self> {
        for engine in ENGINES {
            if which::which(engine).is_ok() {
                tracing::debug!(engine, "fallback speech engine found");
                return Ok(Self {
                    program: engine.to_string(),
                    language: None,
                });
            }
        }
        Err(Error::FallbackUnavailable(format!(
            "no speech engine installed (looked for {})",
            ENGINES.join(", ")
        )))
    }

    /// Voice language hint, e.g. `ja` for espeak or a voice name for `say`.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    fn build_args(&self, text: &str, wav_path: &str) -> Vec<String> {
        let mut args = Vec::new();
        match self.program.as_str() {
            "say" => {
                if let Some(language) = &self.language {
                    args.push("-v".to_string());
                    args.push(language.clone());
                }
                args.push("-o".to_string());
                args.push(wav_path.to_string());
                args.push("--data-format=LEI16@22050".to_string());
                args.push(text.to_string());
            }
            // espeak and espeak-ng share a flag set
            _ => {
                if let Some(language) = &self.language {
                    args.push("-v".to_string());
                    args.push(language.clone());
                }
                args.push("-w".to_string());
                args.push(wav_path.to_string());
                args.push(text.to_string());
            }
        }
        args
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        let wav_file = tempfile::Builder::new()
            .prefix("kaiwa-speech-")
            .suffix(".wav")
            .tempfile()?;
        let wav_path = wav_file.path().to_string_lossy().into_owned();

        let args = self.build_args(text, &wav_path);
        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::Synthesis(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Synthesis(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let clip = read_wav(wav_file.path())?;
        tracing::debug!(
            engine = %self.program,
            duration_ms = clip.duration().as_millis(),
            "fallback speech synthesized"
        );
        Ok(clip)
    }
}

/// Read a WAV file into mono f32 samples.
fn read_wav(path: &std::path::Path) -> Result<AudioClip> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| Error::Synthesis(format!("failed to read engine output: {e}")))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = f32::from(i16::MAX);
            reader
                .samples::<i16>()
                .map(|s| s.map(|v| f32::from(v) / max))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Synthesis(format!("bad sample in engine output: {e}")))?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Synthesis(format!("bad sample in engine output: {e}")))?,
    };

    // Average interleaved channels down to mono.
    let samples = if spec.channels > 1 {
        let divisor = f32::from(spec.channels);
        samples
            .chunks_exact(usize::from(spec.channels))
            .map(|frame| frame.iter().sum::<f32>() / divisor)
            .collect()
    } else {
        samples
    };

    if samples.is_empty() {
        return Err(Error::Synthesis("engine produced no audio".to_string()));
    }

    Ok(AudioClip {
        samples,
        sample_rate: spec.sample_rate,
    })
}
