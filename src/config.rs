//! Configuration
//!
//! Environment variables overlay `settings.toml` under the platform config
//! directory, which overlays built-in defaults. A malformed settings file
//! warns and falls back; a missing API key only becomes an error when the
//! remote collaborators are built.

use std::path::PathBuf;

use serde::Deserialize;

use crate::{Error, Result};

/// Default OpenAI-compatible API root
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Runtime configuration, fully resolved.
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote chat service
    pub chat: ChatConfig,

    /// Recognition, synthesis, and playback
    pub voice: VoiceConfig,

    /// Conversation framing and history
    pub conversation: ConversationConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Remote chat service configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// API root, e.g. `https://api.openai.com`
    pub base_url: String,

    /// Chat model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Request streamed replies; off means one complete text per reply
    pub streaming: bool,
}

/// Voice pipeline configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Transcription model (e.g. "whisper-1")
    pub stt_model: String,

    /// Synthesis model (e.g. "tts-1")
    pub tts_model: String,

    /// Synthesis voice identifier (e.g. "alloy")
    pub tts_voice: String,

    /// Synthesis speed multiplier
    pub tts_speed: f32,

    /// Pause between spoken sentences, in milliseconds
    pub gap_ms: u64,
}

/// Conversation framing configuration
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Practice language, as named in the system prompt (e.g. "Japanese")
    pub language: String,

    /// ISO-639-1 code for transcription and the fallback voice (e.g. "ja")
    pub language_code: String,

    /// Optional conversation topic woven into the system prompt
    pub topic: Option<String>,

    /// Rolling history cap, in messages
    pub history_limit: usize,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<String>,
}

impl Config {
    /// Resolve configuration from the environment and the settings file.
    #[must_use]
    pub fn load() -> Self {
        Self::from_settings(load_settings_file())
    }

    fn from_settings(file: SettingsFile) -> Self {
        let chat = ChatConfig {
            base_url: std::env::var("KAIWA_BASE_URL")
                .ok()
                .or(file.chat.base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: std::env::var("KAIWA_CHAT_MODEL")
                .ok()
                .or(file.chat.model)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            temperature: std::env::var("KAIWA_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(file.chat.temperature)
                .unwrap_or(0.7),
            streaming: std::env::var("KAIWA_STREAMING")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(file.chat.streaming)
                .unwrap_or(true),
        };

        let voice = VoiceConfig {
            stt_model: std::env::var("KAIWA_STT_MODEL")
                .ok()
                .or(file.voice.stt_model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            tts_model: std::env::var("KAIWA_TTS_MODEL")
                .ok()
                .or(file.voice.tts_model)
                .unwrap_or_else(|| "tts-1".to_string()),
            tts_voice: std::env::var("KAIWA_TTS_VOICE")
                .ok()
                .or(file.voice.tts_voice)
                .unwrap_or_else(|| "alloy".to_string()),
            tts_speed: std::env::var("KAIWA_TTS_SPEED")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(file.voice.tts_speed)
                .unwrap_or(1.0),
            gap_ms: std::env::var("KAIWA_GAP_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(file.voice.gap_ms)
                .unwrap_or(120),
        };

        let conversation = ConversationConfig {
            language: std::env::var("KAIWA_LANGUAGE")
                .ok()
                .or(file.conversation.language)
                .unwrap_or_else(|| "Japanese".to_string()),
            language_code: std::env::var("KAIWA_LANGUAGE_CODE")
                .ok()
                .or(file.conversation.language_code)
                .unwrap_or_else(|| "ja".to_string()),
            topic: std::env::var("KAIWA_TOPIC").ok().or(file.conversation.topic),
            history_limit: std::env::var("KAIWA_HISTORY_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(file.conversation.history_limit)
                .unwrap_or(16),
        };

        let api_keys = ApiKeys {
            openai: std::env::var("OPENAI_API_KEY")
                .ok()
                .or(file.api_keys.openai),
        };

        Self {
            chat,
            voice,
            conversation,
            api_keys,
        }
    }

    /// The API key for the remote chat/speech services.
    ///
    /// # Errors
    ///
    /// Returns `Config` when none is set.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_keys
            .openai
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                Error::Config(
                    "no API key: set OPENAI_API_KEY or api_keys.openai in settings.toml"
                        .to_string(),
                )
            })
    }
}

/// Partial overlay loaded from `settings.toml`; every field optional.
#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    chat: ChatSettings,

    #[serde(default)]
    voice: VoiceSettings,

    #[serde(default)]
    conversation: ConversationSettings,

    #[serde(default)]
    api_keys: ApiKeysSettings,
}

#[derive(Debug, Default, Deserialize)]
struct ChatSettings {
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    streaming: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct VoiceSettings {
    stt_model: Option<String>,
    tts_model: Option<String>,
    tts_voice: Option<String>,
    tts_speed: Option<f32>,
    gap_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationSettings {
    language: Option<String>,
    language_code: Option<String>,
    topic: Option<String>,
    history_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiKeysSettings {
    openai: Option<String>,
}

/// Settings file path: `<config dir>/kaiwa/settings.toml`
fn settings_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("kaiwa").join("settings.toml"))
}

/// Load the settings file, falling back to defaults if absent or malformed.
fn load_settings_file() -> SettingsFile {
    let Some(path) = settings_path() else {
        return SettingsFile::default();
    };
    if !path.exists() {
        return SettingsFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                tracing::info!(path = %path.display(), "loaded settings file");
                settings
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse settings file, using defaults"
                );
                SettingsFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read settings file, using defaults"
            );
            SettingsFile::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_file_parses_partial_toml() {
        let settings: SettingsFile = toml::from_str(
            r#"
            [chat]
            model = "gpt-4o"

            [voice]
            tts_voice = "nova"
            gap_ms = 200

            [conversation]
            language = "French"
            language_code = "fr"
            "#,
        )
        .unwrap();

        assert_eq!(settings.chat.model.as_deref(), Some("gpt-4o"));
        assert!(settings.chat.base_url.is_none());
        assert_eq!(settings.voice.tts_voice.as_deref(), Some("nova"));
        assert_eq!(settings.voice.gap_ms, Some(200));
        assert_eq!(settings.conversation.language.as_deref(), Some("French"));
    }

    #[test]
    fn file_values_override_defaults() {
        let settings: SettingsFile = toml::from_str(
            r#"
            [voice]
            tts_speed = 1.25
            "#,
        )
        .unwrap();
        let config = Config::from_settings(settings);

        assert!((config.voice.tts_speed - 1.25).abs() < f32::EPSILON);
        assert_eq!(config.voice.tts_model, "tts-1");
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let config = Config {
            chat: ChatConfig {
                base_url: DEFAULT_BASE_URL.to_string(),
                model: "gpt-4o-mini".to_string(),
                temperature: 0.7,
                streaming: true,
            },
            voice: VoiceConfig {
                stt_model: "whisper-1".to_string(),
                tts_model: "tts-1".to_string(),
                tts_voice: "alloy".to_string(),
                tts_speed: 1.0,
                gap_ms: 120,
            },
            conversation: ConversationConfig {
                language: "Japanese".to_string(),
                language_code: "ja".to_string(),
                topic: None,
                history_limit: 16,
            },
            api_keys: ApiKeys { openai: None },
        };
        assert!(matches!(config.require_api_key(), Err(Error::Config(_))));
    }
}
