//! Non-streaming responses.
//!
//! Concatenates every content delta of the upstream event stream and wraps the
//! text in a single `chat.completion` object.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::common::{completion_id, now_secs, system_fingerprint};
use super::sse::{LineBuffer, SseLine, classify};
use crate::constants::PROMPT_TOKENS_PLACEHOLDER;
use crate::error::ProxyError;

/// Collects `choices[].delta.content` fragments in arrival order.
#[derive(Debug, Default)]
pub struct Aggregator {
    content: String,
    done: bool,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one upstream line. Returns `false` once `[DONE]` was seen.
    pub fn feed(&mut self, line: &str) -> bool {
        if self.done {
            return false;
        }
        match classify(line) {
            SseLine::Other => {}
            SseLine::Done => self.done = true,
            SseLine::Data(payload) => match serde_json::from_str::<Value>(payload) {
                Ok(event) => {
                    let fragments = event
                        .get("choices")
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                        .filter_map(|choice| choice.pointer("/delta/content")?.as_str());
                    for fragment in fragments {
                        self.content.push_str(fragment);
                    }
                }
                Err(e) => warn!("Skipping unparseable upstream line: {e}"),
            },
        }
        !self.done
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn into_content(self) -> String {
        self.content
    }
}

/// Drain an upstream event stream into its concatenated content.
pub async fn aggregate_stream<S, E>(body: S) -> Result<String, ProxyError>
where
    S: Stream<Item = Result<Bytes, E>>,
    ProxyError: From<E>,
{
    let mut aggregator = Aggregator::new();
    let mut lines = LineBuffer::new();
    let mut body = std::pin::pin!(body);

    'read: while let Some(chunk) = body.next().await {
        lines.push(&chunk?);
        while let Some(line) = lines.next_line() {
            if !aggregator.feed(&line) {
                break 'read;
            }
        }
    }
    if let Some(line) = lines.finish() {
        aggregator.feed(&line);
    }

    debug!("Aggregated {} chars", aggregator.content().len());
    Ok(aggregator.into_content())
}

/// Character-based completion token estimate (whitespace excluded).
pub fn estimate_tokens(text: &str) -> u32 {
    let count = text.chars().filter(|c| !c.is_whitespace()).count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
    pub system_fingerprint: String,
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: AssistantMessage,
    pub logprobs: Option<Value>,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
    pub refusal: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub prompt_tokens_details: PromptTokensDetails,
    pub completion_tokens_details: CompletionTokensDetails,
}

#[derive(Debug, Default, Serialize)]
pub struct PromptTokensDetails {
    pub cached_tokens: u32,
    pub audio_tokens: u32,
}

#[derive(Debug, Default, Serialize)]
pub struct CompletionTokensDetails {
    pub reasoning_tokens: u32,
    pub audio_tokens: u32,
    pub accepted_prediction_tokens: u32,
    pub rejected_prediction_tokens: u32,
}

impl Usage {
    pub fn estimate(content: &str) -> Self {
        let completion_tokens = estimate_tokens(content);
        Self {
            prompt_tokens: PROMPT_TOKENS_PLACEHOLDER,
            completion_tokens,
            total_tokens: PROMPT_TOKENS_PLACEHOLDER.saturating_add(completion_tokens),
            prompt_tokens_details: PromptTokensDetails::default(),
            completion_tokens_details: CompletionTokensDetails::default(),
        }
    }
}

impl ChatCompletion {
    pub fn new(model: impl Into<String>, content: String) -> Self {
        let usage = Usage::estimate(&content);
        Self {
            id: completion_id(),
            object: "chat.completion",
            created: now_secs(),
            model: model.into(),
            choices: vec![Choice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant",
                    content,
                    refusal: None,
                },
                logprobs: None,
                finish_reason: "stop",
            }],
            usage,
            system_fingerprint: system_fingerprint(),
        }
    }
}
