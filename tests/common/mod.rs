//! Shared test collaborators
//!
//! Scripted stand-ins for the hardware- and network-backed pieces so turn
//! handling and playback sequencing can be tested deterministically.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use kaiwa::chat::{ChatClient, ChatMessage, Reply};
use kaiwa::synth::{AudioQueueItem, SpeechSynthesizer, SynthOutcome};
use kaiwa::voice::{AudioClip, AudioSink, RecognitionSession};
use kaiwa::{Error, Result};

/// Marker clip whose sample count identifies its source text.
#[must_use]
pub fn marker_clip(text: &str) -> AudioClip {
    AudioClip {
        samples: vec![0.0; marker_len(text)],
        sample_rate: 16_000,
    }
}

/// The sample count `marker_clip` produces for `text`.
#[must_use]
pub fn marker_len(text: &str) -> usize {
    text.chars().count() * 100
}

/// A queue item that resolved with remote audio.
#[must_use]
pub fn remote_item(seq: usize, text: &str) -> AudioQueueItem {
    AudioQueueItem {
        seq,
        text: text.to_string(),
        outcome: SynthOutcome::Remote(marker_clip(text)),
    }
}

/// A queue item whose synthesis failed on every path.
#[must_use]
pub fn skipped_item(seq: usize, text: &str) -> AudioQueueItem {
    AudioQueueItem {
        seq,
        text: text.to_string(),
        outcome: SynthOutcome::Skipped,
    }
}

/// Recognizer that replays scripted transcripts.
pub struct ScriptedRecognizer {
    results: Mutex<VecDeque<Result<String>>>,
    supported: bool,
    delay: Duration,
    interim: Option<String>,
}

impl ScriptedRecognizer {
    /// Resolve each `listen` call with the next line, in order.
    #[must_use]
    pub fn saying(lines: &[&str]) -> Self {
        Self {
            results: Mutex::new(lines.iter().map(|l| Ok((*l).to_string())).collect()),
            supported: true,
            delay: Duration::ZERO,
            interim: None,
        }
    }

    /// A recognizer that reports no support on this host.
    #[must_use]
    pub fn unsupported() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            supported: false,
            delay: Duration::ZERO,
            interim: None,
        }
    }

    /// Fail the first `listen` call with the given error.
    #[must_use]
    pub fn failing(error: Error) -> Self {
        Self {
            results: Mutex::new(VecDeque::from([Err(error)])),
            supported: true,
            delay: Duration::ZERO,
            interim: None,
        }
    }

    /// Delay before each `listen` resolves.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Send one interim hypothesis before the final transcript.
    #[must_use]
    pub fn with_interim(mut self, text: &str) -> Self {
        self.interim = Some(text.to_string());
        self
    }
}

#[async_trait]
impl RecognitionSession for ScriptedRecognizer {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn listen(&self, interim: mpsc::UnboundedSender<String>) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        if let Some(hypothesis) = &self.interim {
            let _ = interim.send(hypothesis.clone());
        }
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::NoSpeech))
    }
}

/// One scripted chat reply.
pub enum ScriptedReply {
    /// The whole text at once.
    Complete(String),
    /// Deltas fed through a stream, `delay` apart, optionally ending in an
    /// error instead of a clean close.
    Stream {
        deltas: Vec<String>,
        delay: Duration,
        error: Option<Error>,
    },
}

/// Chat client that replays scripted replies and counts calls.
#[derive(Default)]
pub struct ScriptedChat {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: AtomicUsize,
}

impl ScriptedChat {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn complete(self, text: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(ScriptedReply::Complete(text.to_string()));
        self
    }

    #[must_use]
    pub fn streaming(self, deltas: &[&str], delay: Duration) -> Self {
        self.replies.lock().unwrap().push_back(ScriptedReply::Stream {
            deltas: deltas.iter().map(|d| (*d).to_string()).collect(),
            delay,
            error: None,
        });
        self
    }

    #[must_use]
    pub fn streaming_then_error(self, deltas: &[&str], delay: Duration, error: Error) -> Self {
        self.replies.lock().unwrap().push_back(ScriptedReply::Stream {
            deltas: deltas.iter().map(|d| (*d).to_string()).collect(),
            delay,
            error: Some(error),
        });
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatClient for ScriptedChat {
    async fn reply(&self, _messages: &[ChatMessage]) -> Result<Reply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.replies.lock().unwrap().pop_front();
        match scripted {
            None => Err(Error::RemoteService("no scripted reply".to_string())),
            Some(ScriptedReply::Complete(text)) => Ok(Reply::Complete(text)),
            Some(ScriptedReply::Stream {
                deltas,
                delay,
                error,
            }) => {
                let (tx, rx) = mpsc::channel(16);
                tokio::spawn(async move {
                    for delta in deltas {
                        if tx.send(Ok(delta)).await.is_err() {
                            return;
                        }
                        tokio::time::sleep(delay).await;
                    }
                    if let Some(e) = error {
                        let _ = tx.send(Err(e)).await;
                    }
                });
                Ok(Reply::Stream(rx))
            }
        }
    }
}

/// Synthesizer producing marker clips, with scripted failures and delays.
#[derive(Default)]
pub struct FakeSynth {
    delay: Duration,
    delays: HashMap<String, Duration>,
    fail_all: bool,
    fail_texts: HashSet<String>,
}

impl FakeSynth {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every synthesis call.
    #[must_use]
    pub fn failing_all() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    /// Fail only for this exact text.
    #[must_use]
    pub fn failing_on(mut self, text: &str) -> Self {
        self.fail_texts.insert(text.to_string());
        self
    }

    /// Delay synthesis of this exact text.
    #[must_use]
    pub fn slow_on(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        let delay = self.delays.get(text).copied().unwrap_or(self.delay);
        tokio::time::sleep(delay).await;
        if self.fail_all || self.fail_texts.contains(text) {
            return Err(Error::Synthesis(format!("scripted failure for {text}")));
        }
        Ok(marker_clip(text))
    }
}

/// Sink that records what it was asked to play.
///
/// A play records its start immediately and its completion only after
/// `play_delay`, so a flush that lands mid-play leaves the item started but
/// never completed.
pub struct RecordingSink {
    started: Mutex<Vec<usize>>,
    completed: Mutex<Vec<usize>>,
    stops: AtomicUsize,
    play_delay: Duration,
    fail_lens: HashSet<usize>,
}

impl RecordingSink {
    /// Playback completes immediately.
    #[must_use]
    pub fn instant() -> Self {
        Self::slow(Duration::ZERO)
    }

    /// Each play takes `play_delay` of wall time.
    #[must_use]
    pub fn slow(play_delay: Duration) -> Self {
        Self {
            started: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            play_delay,
            fail_lens: HashSet::new(),
        }
    }

    /// Reject clips with this exact sample count.
    #[must_use]
    pub fn failing_on_len(mut self, len: usize) -> Self {
        self.fail_lens.insert(len);
        self
    }

    /// Sample counts of plays that started, in order.
    pub fn started(&self) -> Vec<usize> {
        self.started.lock().unwrap().clone()
    }

    /// Sample counts of plays that ran to completion, in order.
    pub fn completed(&self) -> Vec<usize> {
        self.completed.lock().unwrap().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, clip: &AudioClip) -> Result<()> {
        self.started.lock().unwrap().push(clip.samples.len());
        if self.fail_lens.contains(&clip.samples.len()) {
            return Err(Error::Playback("scripted device failure".to_string()));
        }
        tokio::time::sleep(self.play_delay).await;
        self.completed.lock().unwrap().push(clip.samples.len());
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
