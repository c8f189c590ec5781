//! Turn coordinator - the conversation state machine
//!
//! Owns the only mutable turn state in the process. A turn runs
//! `Idle → Listening → AwaitingReply → Speaking → Idle`; listening and
//! speaking can never overlap because every transition goes through this
//! coordinator, and entering `Listening` flushes playback first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chat::{ChatClient, ChatMessage};
use crate::sequencer::PlaybackSequencer;
use crate::stream::{SentenceSegment, SentenceStream};
use crate::synth::{SynthOutcome, SynthesisGateway};
use crate::voice::RecognitionSession;
use crate::{Error, Result};

/// Broadcast event capacity; slow subscribers lag rather than block the turn
const EVENT_CAPACITY: usize = 64;

/// Where a conversation turn currently stands.
///
/// One value for the whole process; invalid combinations (listening while
/// speaking, two queues busy at once) cannot be expressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    /// Nothing in flight.
    Idle,
    /// The microphone is open and recognition is running.
    Listening,
    /// The transcript was sent; no sentence has completed yet.
    AwaitingReply,
    /// At least one sentence is synthesizing, queued, or playing.
    Speaking,
}

/// Observable moments in a turn's life.
#[derive(Clone, Debug)]
pub enum TurnEvent {
    /// The state machine moved.
    StateChanged(TurnState),
    /// A partial recognition hypothesis arrived while listening.
    InterimTranscript(String),
    /// Recognition finalized the user's utterance.
    TranscriptFinal(String),
    /// A completed sentence was handed to synthesis and given a playback slot.
    SegmentQueued {
        /// Playback sequence number
        seq: usize,
        /// Sentence text
        text: String,
    },
    /// Every synthesis path failed for this sentence; playback skips it.
    SentenceSkipped {
        /// Playback sequence number
        seq: usize,
        /// Sentence text
        text: String,
    },
}

/// How a turn ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The full cycle ran: speech in, reply spoken, playback drained.
    Completed(TurnRecord),
    /// Recognition finalized an empty transcript; nothing was sent upstream.
    Empty,
    /// The turn was cancelled or displaced by a newer turn.
    Cancelled,
}

/// A completed exchange, ready for history or storage.
#[derive(Clone, Debug, serde::Serialize)]
pub struct TurnRecord {
    /// Unique turn id
    pub id: Uuid,
    /// When listening began
    pub started_at: DateTime<Utc>,
    /// When playback drained
    pub finished_at: DateTime<Utc>,
    /// What the user said
    pub user_text: String,
    /// What the assistant replied, as spoken
    pub reply_text: String,
    /// How many sentences the reply was spoken in
    pub sentences: usize,
}

/// Drives conversation turns across recognition, chat, synthesis, and
/// playback.
pub struct TurnCoordinator {
    recognizer: Arc<dyn RecognitionSession>,
    chat: Arc<dyn ChatClient>,
    gateway: Arc<SynthesisGateway>,
    sequencer: Arc<PlaybackSequencer>,
    state: watch::Sender<TurnState>,
    events: broadcast::Sender<TurnEvent>,
    turn_gate: tokio::sync::Mutex<()>,
    current_cancel: std::sync::Mutex<CancellationToken>,
}

impl TurnCoordinator {
    #[must_use]
    pub fn new(
        recognizer: Arc<dyn RecognitionSession>,
        chat: Arc<dyn ChatClient>,
        gateway: Arc<SynthesisGateway>,
        sequencer: Arc<PlaybackSequencer>,
    ) -> Self {
        let (state, _) = watch::channel(TurnState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            recognizer,
            chat,
            gateway,
            sequencer,
            state,
            events,
            turn_gate: tokio::sync::Mutex::new(()),
            current_cancel: std::sync::Mutex::new(CancellationToken::new()),
        }
    }

    /// Current turn state.
    #[must_use]
    pub fn state(&self) -> TurnState {
        *self.state.borrow()
    }

    /// Watch turn state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<TurnState> {
        self.state.subscribe()
    }

    /// Subscribe to turn events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.events.subscribe()
    }

    /// End the current turn: abort listening, stop consuming deltas, flush
    /// playback. Speech output has stopped by the time this returns; the
    /// in-flight `run_turn` resolves to `Cancelled` at its next await.
    pub fn cancel(&self) {
        if let Ok(slot) = self.current_cancel.lock() {
            slot.cancel();
        }
        self.sequencer.flush();
        tracing::debug!("turn cancellation requested");
    }

    /// Run one full conversation turn.
    ///
    /// `prior` is the conversation so far: the system prompt followed by the
    /// rolling history. The recognized utterance is appended as the newest
    /// user message before the reply is requested.
    ///
    /// A turn already in flight is displaced: it is cancelled and this turn
    /// starts once it has unwound.
    ///
    /// # Errors
    ///
    /// `RecognitionUnavailable` when no speech input exists,
    /// `PermissionDenied` when the microphone is refused, `NoSpeech` when the
    /// listening window closes silently, and the chat error taxonomy
    /// (`Unauthorized`, `RateLimited`, `RemoteService`, `Network`) when the
    /// reply fails. Synthesis and playback failures never surface here; they
    /// degrade per-sentence. The machine is back in `Idle` on every error
    /// path.
    #[allow(clippy::too_many_lines)]
    pub async fn run_turn(&self, prior: &[ChatMessage]) -> Result<TurnOutcome> {
        let cancel = CancellationToken::new();
        if let Ok(mut slot) = self.current_cancel.lock() {
            slot.cancel();
            *slot = cancel.clone();
        }

        let _gate = self.turn_gate.lock().await;
        if cancel.is_cancelled() {
            return Ok(TurnOutcome::Cancelled);
        }
        let started_at = Utc::now();

        if !self.recognizer.is_supported() {
            return Err(Error::RecognitionUnavailable(
                "no speech input available on this host".to_string(),
            ));
        }

        // Listening and speaking are mutually exclusive: silence the output
        // before the microphone opens.
        self.sequencer.flush();
        self.set_state(TurnState::Listening);

        let (interim_tx, mut interim_rx) = mpsc::unbounded_channel();
        let interim_events = self.events.clone();
        tokio::spawn(async move {
            while let Some(text) = interim_rx.recv().await {
                let _ = interim_events.send(TurnEvent::InterimTranscript(text));
            }
        });

        let listened = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.set_state(TurnState::Idle);
                return Ok(TurnOutcome::Cancelled);
            }
            result = self.recognizer.listen(interim_tx) => result,
        };
        let transcript = match listened {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                self.set_state(TurnState::Idle);
                return Err(e);
            }
        };
        if transcript.is_empty() {
            tracing::debug!("empty transcript, nothing to send");
            self.set_state(TurnState::Idle);
            return Ok(TurnOutcome::Empty);
        }
        let _ = self
            .events
            .send(TurnEvent::TranscriptFinal(transcript.clone()));

        self.set_state(TurnState::AwaitingReply);
        let mut messages = prior.to_vec();
        messages.push(ChatMessage::user(&transcript));

        let requested = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.set_state(TurnState::Idle);
                return Ok(TurnOutcome::Cancelled);
            }
            result = self.chat.reply(&messages) => result,
        };
        let reply = match requested {
            Ok(reply) => reply,
            Err(e) => {
                self.set_state(TurnState::Idle);
                return Err(e);
            }
        };

        let mut stream = SentenceStream::new(reply);
        let mut synth_tasks: Vec<JoinHandle<()>> = Vec::new();
        let mut reply_text = String::new();
        let mut sentences = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.abandon_reply(&synth_tasks);
                    return Ok(TurnOutcome::Cancelled);
                }
                result = stream.next_segment() => result,
            };
            match next {
                Ok(Some(segment)) => {
                    // First completed sentence starts speech; synthesis for it
                    // is issued immediately, well before the reply finishes.
                    self.set_state(TurnState::Speaking);
                    reply_text.push_str(&segment.text);
                    sentences += 1;
                    self.dispatch_segment(segment, &mut synth_tasks);
                }
                Ok(None) => break,
                Err(e) => {
                    self.abandon_reply(&synth_tasks);
                    return Err(e);
                }
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.abandon_reply(&synth_tasks);
                return Ok(TurnOutcome::Cancelled);
            }
            () = self.sequencer.wait_for_drain() => {}
        }

        self.set_state(TurnState::Idle);
        let record = TurnRecord {
            id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            user_text: transcript,
            reply_text,
            sentences,
        };
        tracing::info!(
            turn = %record.id,
            sentences = record.sentences,
            "turn completed"
        );
        Ok(TurnOutcome::Completed(record))
    }

    /// Reserve the segment's playback slot now, then synthesize concurrently.
    /// Slot order is enqueue order, so playback stays strictly sequential
    /// even when later sentences finish synthesis first.
    fn dispatch_segment(&self, segment: SentenceSegment, tasks: &mut Vec<JoinHandle<()>>) {
        let (tx, rx) = oneshot::channel();
        self.sequencer.enqueue(segment.index, segment.text.clone(), rx);
        let _ = self.events.send(TurnEvent::SegmentQueued {
            seq: segment.index,
            text: segment.text.clone(),
        });

        let gateway = Arc::clone(&self.gateway);
        let events = self.events.clone();
        tasks.push(tokio::spawn(async move {
            let item = gateway.synthesize(segment.index, &segment.text).await;
            if matches!(item.outcome, SynthOutcome::Skipped) {
                let _ = events.send(TurnEvent::SentenceSkipped {
                    seq: item.seq,
                    text: item.text.clone(),
                });
            }
            // Receiver may be gone after a flush.
            let _ = tx.send(item);
        }));
    }

    /// Cancellation cleanup while a reply is in flight: discard queued and
    /// playing audio, drop in-flight synthesis, return to `Idle`.
    fn abandon_reply(&self, tasks: &[JoinHandle<()>]) {
        self.sequencer.flush();
        for task in tasks {
            task.abort();
        }
        self.set_state(TurnState::Idle);
    }

    fn set_state(&self, next: TurnState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            tracing::debug!(state = ?next, "turn state changed");
            let _ = self.events.send(TurnEvent::StateChanged(next));
        }
    }
}
