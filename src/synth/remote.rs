//! Remote speech synthesis over an OpenAI-compatible audio endpoint

use std::time::Duration;

use async_trait::async_trait;

use super::SpeechSynthesizer;
use crate::voice::{AudioClip, decode_mp3};
use crate::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Synthesizes speech through `POST /v1/audio/speech`.
pub struct RemoteSynthesizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    speed: f32,
}

impl RemoteSynthesizer {
    /// Create a remote synthesizer.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the API key is empty or the HTTP client cannot be
    /// constructed.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::Config(
                "API key required for remote synthesis".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            voice: voice.into(),
            speed: 1.0,
        })
    }

    /// Playback speed multiplier passed through to the service.
    #[must_use]
    pub const fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }
}

#[async_trait]
impl SpeechSynthesizer for RemoteSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let url = format!("{}/v1/audio/speech", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Synthesis(format!("speech request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!(
                "speech service error {status}: {body}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(format!("speech body read failed: {e}")))?;
        tracing::debug!(chars = text.len(), audio_bytes = audio.len(), "speech synthesized");

        decode_mp3(&audio)
    }
}

#[derive(serde::Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_is_rejected() {
        let result = RemoteSynthesizer::new("https://api.openai.com", "", "tts-1", "alloy");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn speech_request_serializes() {
        let request = SpeechRequest {
            model: "tts-1",
            input: "こんにちは。",
            voice: "alloy",
            speed: 1.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "tts-1");
        assert_eq!(json["input"], "こんにちは。");
        assert_eq!(json["voice"], "alloy");
    }
}
