//! OpenAI-compatible chat completions client
//!
//! Speaks the `/v1/chat/completions` protocol in both streaming (SSE) and
//! non-streaming modes. Any endpoint implementing the same contract works by
//! pointing `base_url` at it.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{ChatClient, ChatMessage, Reply};
use crate::{Error, Result};

/// Buffered deltas between the network task and the consumer
const DELTA_CHANNEL_SIZE: usize = 64;

/// Whole-request timeout, generous because streams stay open for the reply
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Chat client for OpenAI-compatible completion endpoints.
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    streaming: bool,
}

impl OpenAiChat {
    /// Create a client for the given endpoint and model.
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
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.7,
            streaming: true,
        })
    }

    /// Toggle streaming; when off, replies arrive as one complete text.
    #[must_use]
    pub const fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Override the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            stream,
            temperature: self.temperature,
        };

        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        tracing::debug!(model = %self.model, stream, messages = messages.len(), "requesting completion");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(map_transport)?;

        check_status(response).await
    }
}

#[async_trait]
impl ChatClient for OpenAiChat {
    async fn reply(&self, messages: &[ChatMessage]) -> Result<Reply> {
        if !self.streaming {
            let response = self.send(messages, false).await?;
            let completion: Completion = response.json().await.map_err(map_transport)?;
            let content = completion
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default();
            tracing::debug!(chars = content.len(), "received complete reply");
            return Ok(Reply::Complete(content));
        }

        let response = self.send(messages, true).await?;
        let (tx, rx) = mpsc::channel(DELTA_CHANNEL_SIZE);
        tokio::spawn(pump_deltas(response, tx));
        Ok(Reply::Stream(rx))
    }
}

/// Forward SSE deltas into the channel until `[DONE]`, the connection ends,
/// or the receiver goes away (cancelled turn).
async fn pump_deltas(response: reqwest::Response, tx: mpsc::Sender<Result<String>>) {
    let mut body = response.bytes_stream();
    // Byte buffer, split on newlines only once a full line is present so
    // multi-byte characters straddling network chunks stay intact.
    let mut buf: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(Err(map_transport(e))).await;
                return;
            }
        };
        buf.extend_from_slice(&chunk);

        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                return;
            }

            match serde_json::from_str::<StreamChunk>(data) {
                Ok(parsed) => {
                    let Some(content) = parsed
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta.content)
                    else {
                        continue;
                    };
                    if !content.is_empty() && tx.send(Ok(content)).await.is_err() {
                        tracing::debug!("delta receiver dropped, abandoning stream");
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unparseable stream line");
                }
            }
        }
    }
    // Connection closed without [DONE]; dropping tx signals completion.
}

fn map_transport(e: reqwest::Error) -> Error {
    if e.is_connect() || e.is_timeout() {
        Error::Network(e.to_string())
    } else {
        Error::Http(e)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status.as_u16() {
        401 | 403 => Error::Unauthorized(format!("chat endpoint refused credentials: {body}")),
        429 => Error::RateLimited(format!("chat endpoint throttled request: {body}")),
        _ => Error::RemoteService(format!("chat completion failed ({status}): {body}")),
    })
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f32,
}

#[derive(Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}
