//! Kaiwa - streaming voice conversation pipeline for language practice
//!
//! The core is the turn orchestration and streaming playback pipeline:
//! - Turn coordination (listening, awaiting the reply, speaking - one state
//!   machine, no overlap between microphone and speaker)
//! - Sentence segmentation of incrementally arriving reply text
//! - Pipelined synthesis with strictly ordered playback and per-sentence
//!   fallback
//!
//! # Architecture
//!
//! ```text
//! microphone ──▶ Recognition ──▶ Turn Coordinator ──▶ chat stream
//!                                      │                   │
//!                                      │            Sentence Stream
//!                                      │                   │
//!                                      ▼                   ▼
//!                               Playback  ◀─slots── Synthesis Gateway
//!                               Sequencer            (remote ▶ fallback)
//!                                      │
//!                                      ▼
//!                                  speaker
//! ```

pub mod chat;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod error;
pub mod prompt;
pub mod segment;
pub mod sequencer;
pub mod stream;
pub mod synth;
pub mod voice;

pub use chat::{ChatClient, ChatMessage, OpenAiChat, Reply, Role};
pub use config::Config;
pub use coordinator::{TurnCoordinator, TurnEvent, TurnOutcome, TurnRecord, TurnState};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use segment::SentenceSegmenter;
pub use sequencer::PlaybackSequencer;
pub use stream::{SentenceSegment, SentenceStream};
pub use synth::{
    AudioQueueItem, CommandSynthesizer, RemoteSynthesizer, SpeechSynthesizer, SynthOutcome,
    SynthesisGateway,
};
pub use voice::{AudioCapture, AudioClip, AudioSink, CpalSink, MicRecognizer, RecognitionSession};
