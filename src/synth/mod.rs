//! Speech synthesis
//!
//! A remote synthesizer produces the natural voice; a local command-line
//! synthesizer stands in when the remote service fails. The gateway folds
//! both behind an infallible call so one bad sentence never stops the reply.

mod fallback;
mod remote;

pub use fallback::CommandSynthesizer;
pub use remote::RemoteSynthesizer;

use async_trait::async_trait;

use crate::Result;
use crate::voice::AudioClip;

/// A speech synthesis backend.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize one sentence to audio.
    ///
    /// # Errors
    ///
    /// Returns `Synthesis` when the backend cannot produce audio for this
    /// text, or `FallbackUnavailable` when the backend itself is absent.
    async fn synthesize(&self, text: &str) -> Result<AudioClip>;
}

/// Where a sentence's audio came from, if anywhere.
#[derive(Debug)]
pub enum SynthOutcome {
    /// The remote service produced the audio.
    Remote(AudioClip),
    /// The local fallback produced the audio.
    Fallback(AudioClip),
    /// Both paths failed; playback skips this sentence.
    Skipped,
}

impl SynthOutcome {
    /// The clip to play, unless the sentence was skipped.
    #[must_use]
    pub fn clip(&self) -> Option<&AudioClip> {
        match self {
            Self::Remote(clip) | Self::Fallback(clip) => Some(clip),
            Self::Skipped => None,
        }
    }
}

/// One sentence's synthesis result, tagged with its position in the reply.
#[derive(Debug)]
pub struct AudioQueueItem {
    /// Zero-based sentence position within the reply.
    pub seq: usize,
    /// The sentence text, kept for logging and transcripts.
    pub text: String,
    /// What synthesis produced.
    pub outcome: SynthOutcome,
}

/// Folds primary and fallback synthesis into one infallible call.
pub struct SynthesisGateway {
    primary: Box<dyn SpeechSynthesizer>,
    fallback: Option<Box<dyn SpeechSynthesizer>>,
}

impl SynthesisGateway {
    #[must_use]
    pub fn new(
        primary: Box<dyn SpeechSynthesizer>,
        fallback: Option<Box<dyn SpeechSynthesizer>>,
    ) -> Self {
        Self { primary, fallback }
    }

    /// Synthesize one sentence, degrading through the fallback chain.
    ///
    /// Never errors: a sentence that defeats every backend comes back as
    /// `Skipped` so the reply keeps moving.
    pub async fn synthesize(&self, seq: usize, text: &str) -> AudioQueueItem {
        match self.primary.synthesize(text).await {
            Ok(clip) => {
                return AudioQueueItem {
                    seq,
                    text: text.to_string(),
                    outcome: SynthOutcome::Remote(clip),
                };
            }
            Err(e) => {
                tracing::warn!(seq, error = %e, "remote synthesis failed, trying fallback");
            }
        }

        if let Some(fallback) = &self.fallback {
            match fallback.synthesize(text).await {
                Ok(clip) => {
                    return AudioQueueItem {
                        seq,
                        text: text.to_string(),
                        outcome: SynthOutcome::Fallback(clip),
                    };
                }
                Err(e) => {
                    tracing::warn!(seq, error = %e, "fallback synthesis failed");
                }
            }
        }

        tracing::warn!(seq, text = %text, "sentence skipped, no synthesis path succeeded");
        AudioQueueItem {
            seq,
            text: text.to_string(),
            outcome: SynthOutcome::Skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::voice::SAMPLE_RATE;

    struct FixedSynth {
        fail: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for FixedSynth {
        async fn synthesize(&self, _text: &str) -> Result<AudioClip> {
            if self.fail {
                Err(Error::Synthesis("backend down".to_string()))
            } else {
                Ok(AudioClip {
                    samples: vec![0.0; 160],
                    sample_rate: SAMPLE_RATE,
                })
            }
        }
    }

    #[tokio::test]
    async fn primary_success_is_remote() {
        let gateway = SynthesisGateway::new(
            Box::new(FixedSynth { fail: false }),
            Some(Box::new(FixedSynth { fail: false })),
        );
        let item = gateway.synthesize(0, "hi").await;
        assert!(matches!(item.outcome, SynthOutcome::Remote(_)));
        assert_eq!(item.seq, 0);
        assert_eq!(item.text, "hi");
    }

    #[tokio::test]
    async fn primary_failure_degrades_to_fallback() {
        let gateway = SynthesisGateway::new(
            Box::new(FixedSynth { fail: true }),
            Some(Box::new(FixedSynth { fail: false })),
        );
        let item = gateway.synthesize(3, "hi").await;
        assert!(matches!(item.outcome, SynthOutcome::Fallback(_)));
        assert_eq!(item.seq, 3);
    }

    #[tokio::test]
    async fn double_failure_is_skipped_not_error() {
        let gateway = SynthesisGateway::new(
            Box::new(FixedSynth { fail: true }),
            Some(Box::new(FixedSynth { fail: true })),
        );
        let item = gateway.synthesize(1, "hi").await;
        assert!(matches!(item.outcome, SynthOutcome::Skipped));
        assert!(item.outcome.clip().is_none());
    }

    #[tokio::test]
    async fn no_fallback_configured_skips_on_primary_failure() {
        let gateway = SynthesisGateway::new(Box::new(FixedSynth { fail: true }), None);
        let item = gateway.synthesize(0, "hi").await;
        assert!(matches!(item.outcome, SynthOutcome::Skipped));
    }
}
