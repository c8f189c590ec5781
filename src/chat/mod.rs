//! Remote conversational-language service interface
//!
//! The pipeline consumes replies either as an incremental delta stream or as
//! one complete text; [`Reply`] carries both shapes through the same contract.

mod openai;

pub use openai::OpenAiChat;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::Result;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Conversation framing (topic prompt)
    System,
    /// Transcribed user speech
    User,
    /// Model reply
    Assistant,
}

/// One message in the rolling conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Message author
    pub role: Role,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Build a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Build an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A model reply, streamed or whole.
pub enum Reply {
    /// Incremental text fragments in arrival order. Channel close is the done
    /// signal; an `Err` delta terminates the stream with that error.
    Stream(mpsc::Receiver<Result<String>>),
    /// The complete reply at once, for providers that do not stream.
    Complete(String),
}

/// Streaming text source for assistant replies.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Request a reply to the given messages (system prompt first, then the
    /// rolling history ending with the newest user message).
    ///
    /// # Errors
    ///
    /// `Unauthorized`, `RateLimited`, `RemoteService`, or `Network` depending
    /// on how the service refused the request.
    async fn reply(&self, messages: &[ChatMessage]) -> Result<Reply>;
}
