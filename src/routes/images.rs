use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::AppState;
use crate::constants::{DEFAULT_MAX_TOKENS, IMAGE_MODEL, IMAGE_SYSTEM_PROMPT};
use crate::error::ProxyError;
use crate::transforms::aggregate_stream;
use crate::transforms::common::now_secs;
use crate::transforms::normalize::{Role, Source, UpstreamChatBody, UpstreamMessage};

#[derive(Debug, Deserialize)]
pub struct ImageGenerationRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub response_format: Option<String>,
}

impl ImageGenerationRequest {
    fn wants_base64(&self) -> bool {
        self.response_format
            .as_deref()
            .is_some_and(|f| f.trim().eq_ignore_ascii_case("b64_json"))
    }
}

/// Storage and download failures are reported as resolution errors (500).
fn into_resolution(error: ProxyError) -> ProxyError {
    match error {
        ProxyError::Resolution(_) => error,
        other => ProxyError::Resolution(other.to_string()),
    }
}

/// Upstream body for an image generation prompt.
pub fn image_body(prompt: &str) -> UpstreamChatBody {
    UpstreamChatBody::new(
        IMAGE_MODEL.to_string(),
        DEFAULT_MAX_TOKENS,
        Source::ImageGeneration,
        vec![
            UpstreamMessage::text(Role::System, IMAGE_SYSTEM_PROMPT),
            UpstreamMessage::text(Role::User, format!("Draw: {prompt}")),
        ],
    )
}

pub async fn generations(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ImageGenerationRequest>, JsonRejection>,
) -> Result<Json<Value>, ProxyError> {
    let Json(request) = body.map_err(|e| ProxyError::InvalidRequest(e.body_text()))?;
    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return Err(ProxyError::InvalidRequest(
            "Missing required field: prompt".to_string(),
        ));
    }
    info!("Image generation: {prompt}");

    let response = state.upstream.chat(&image_body(prompt)).await?;
    let markdown = aggregate_stream(response.bytes_stream()).await?;
    if markdown.trim().is_empty() {
        return Err(ProxyError::Resolution(
            "Upstream returned no image content".to_string(),
        ));
    }

    let url = state
        .upstream
        .resolve_markdown_image(&markdown)
        .await
        .map_err(into_resolution)?;

    let item = if request.wants_base64() {
        let bytes = state.upstream.download(&url).await.map_err(into_resolution)?;
        json!({ "b64_json": BASE64.encode(&bytes) })
    } else {
        json!({ "url": url })
    };

    Ok(Json(json!({
        "created": now_secs(),
        "data": [item]
    })))
}
