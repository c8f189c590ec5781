//! Daemon - the conversation loop
//!
//! Builds the real collaborators from configuration, wires them into a turn
//! coordinator, and repeats turns until interrupted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::chat::{ChatMessage, OpenAiChat};
use crate::coordinator::{TurnCoordinator, TurnEvent, TurnOutcome};
use crate::prompt::system_prompt;
use crate::sequencer::PlaybackSequencer;
use crate::synth::{CommandSynthesizer, RemoteSynthesizer, SpeechSynthesizer, SynthesisGateway};
use crate::voice::{CpalSink, MicRecognizer};
use crate::{Config, Error, Result};

/// Pause after a turn-aborting error before listening again
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// The kaiwa daemon - runs voice conversation turns until interrupted.
pub struct Daemon {
    config: Config,
    coordinator: Arc<TurnCoordinator>,
}

impl Daemon {
    /// Build the daemon and its collaborators from configuration.
    ///
    /// Must be called inside a tokio runtime; the playback worker is spawned
    /// here.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the API key is missing or an HTTP client cannot be
    /// built, and `Audio` if no output device exists.
    pub fn new(config: Config) -> Result<Self> {
        let api_key = config.require_api_key()?;
        let base_url = &config.chat.base_url;

        let recognizer = MicRecognizer::new(base_url, api_key, &config.voice.stt_model)?
            .with_language(&config.conversation.language_code);

        let chat = OpenAiChat::new(base_url, api_key, &config.chat.model)?
            .with_streaming(config.chat.streaming)
            .with_temperature(config.chat.temperature);

        let remote = RemoteSynthesizer::new(
            base_url,
            api_key,
            &config.voice.tts_model,
            &config.voice.tts_voice,
        )?
        .with_speed(config.voice.tts_speed);

        let fallback: Option<Box<dyn SpeechSynthesizer>> = match CommandSynthesizer::discover() {
            Ok(synth) => Some(Box::new(
                synth.with_language(&config.conversation.language_code),
            )),
            Err(e) => {
                tracing::warn!(error = %e, "no fallback synthesizer, failed sentences will be skipped");
                None
            }
        };
        let gateway = SynthesisGateway::new(Box::new(remote), fallback);

        let sink = Arc::new(CpalSink::new()?);
        let sequencer = PlaybackSequencer::new(sink, Duration::from_millis(config.voice.gap_ms));

        let coordinator = Arc::new(TurnCoordinator::new(
            Arc::new(recognizer),
            Arc::new(chat),
            Arc::new(gateway),
            Arc::new(sequencer),
        ));

        Ok(Self {
            config,
            coordinator,
        })
    }

    /// Run conversation turns until ctrl-c.
    ///
    /// Recoverable outcomes (silence, empty transcript) listen again
    /// immediately; turn-aborting errors back off briefly and continue.
    /// Nothing here ends the process except the interrupt signal.
    ///
    /// # Errors
    ///
    /// Currently none beyond signal handling; the loop absorbs turn errors.
    pub async fn run(self) -> Result<()> {
        let conversation = &self.config.conversation;
        tracing::info!(
            language = %conversation.language,
            model = %self.config.chat.model,
            voice = %self.config.voice.tts_voice,
            topic = conversation.topic.as_deref().unwrap_or("free conversation"),
            "conversation started, speak when ready (ctrl-c to end)"
        );

        spawn_event_logger(self.coordinator.subscribe());

        let system = system_prompt(&conversation.language, conversation.topic.as_deref());
        let history_limit = conversation.history_limit.max(2);
        let mut history: Vec<ChatMessage> = Vec::new();

        loop {
            let mut messages = Vec::with_capacity(history.len() + 1);
            messages.push(ChatMessage::system(&system));
            messages.extend_from_slice(&history);

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received, ending conversation");
                    self.coordinator.cancel();
                    break;
                }
                outcome = self.coordinator.run_turn(&messages) => match outcome {
                    Ok(TurnOutcome::Completed(record)) => {
                        history.push(ChatMessage::user(&record.user_text));
                        history.push(ChatMessage::assistant(&record.reply_text));
                        while history.len() > history_limit {
                            history.drain(..2);
                        }
                    }
                    Ok(TurnOutcome::Empty) => {
                        tracing::info!("heard nothing, listening again");
                    }
                    Ok(TurnOutcome::Cancelled) => {
                        tracing::debug!("turn cancelled");
                    }
                    Err(Error::NoSpeech) => {
                        tracing::info!("no speech detected, listening again");
                    }
                    Err(e) if e.aborts_turn() => {
                        tracing::error!(error = %e, "turn failed");
                        tokio::select! {
                            _ = tokio::signal::ctrl_c() => {
                                self.coordinator.cancel();
                                break;
                            }
                            () = tokio::time::sleep(RETRY_BACKOFF) => {}
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "turn error, listening again");
                    }
                },
            }
        }

        tracing::info!("conversation ended");
        Ok(())
    }
}

/// Translate turn events into log lines; the only subscriber in headless runs.
fn spawn_event_logger(mut events: broadcast::Receiver<TurnEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn log_event(event: &TurnEvent) {
    match event {
        TurnEvent::StateChanged(state) => tracing::info!(state = ?state, "turn state"),
        TurnEvent::InterimTranscript(text) => tracing::debug!(text = %text, "interim transcript"),
        TurnEvent::TranscriptFinal(text) => tracing::info!(text = %text, "heard"),
        TurnEvent::SegmentQueued { seq, text } => {
            tracing::debug!(seq, text = %text, "sentence queued");
        }
        TurnEvent::SentenceSkipped { seq, text } => {
            tracing::warn!(seq, text = %text, "sentence skipped, no synthesis path available");
        }
    }
}
