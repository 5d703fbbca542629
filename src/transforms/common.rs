//! Shared utilities for response synthesis.

use rand::Rng;
use rand::distr::Alphanumeric;
use serde_json::{Value, json};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Random 24-character identifier for synthesized stream events.
pub fn generate_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

/// Identifier for aggregated completions: `chatcmpl-{32 hex}`.
pub fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

/// `fp_` followed by 12 hex characters.
pub fn system_fingerprint() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("fp_{}", &hex[..12])
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

pub fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Build a `chat.completion.chunk` carrying a single content delta.
pub fn content_chunk(model: &str, created: u64, content: &str) -> Value {
    json!({
        "id": generate_id(),
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": { "content": content },
            "finish_reason": Value::Null
        }],
        "system_fingerprint": system_fingerprint()
    })
}
