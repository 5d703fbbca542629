use axum::{
    Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::AppState;
use crate::constants::MODELS;
use crate::error::ProxyError;
use crate::transforms::{
    ChatCompletion, ChatRequest, aggregate_stream, normalize_request, transcode_stream,
};

const WELCOME_PAGE: &str = "<html><head><title>Chat Gateway</title></head><body>\
<h1>Chat Gateway</h1>\
<p>OpenAI-compatible API for chatting with GPT and Claude models. \
POST your messages to this endpoint to receive a completion.</p>\
</body></html>";

pub async fn list_models() -> Json<Value> {
    let models: Vec<Value> = MODELS
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model"
            })
        })
        .collect();

    Json(json!({
        "object": "list",
        "data": models
    }))
}

pub async fn welcome() -> Html<&'static str> {
    Html(WELCOME_PAGE)
}

/// Explicit preflight answer for API routes.
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ProxyError> {
    let Json(request) = body.map_err(|e| ProxyError::InvalidRequest(e.body_text()))?;

    let normalized = normalize_request(request, &state.default_model, &state.upstream).await?;
    let model = normalized.body.model.clone();
    info!(
        "Chat request: model={model}, source={}, stream={}, messages={}, images={}",
        normalized.body.source.as_str(),
        normalized.stream,
        normalized.body.messages.len(),
        normalized.has_image
    );

    let response = state.upstream.chat(&normalized.body).await?;

    if normalized.stream {
        let events = transcode_stream(response.bytes_stream(), model, state.upstream.clone());
        Ok((
            [
                (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            Body::from_stream(events),
        )
            .into_response())
    } else {
        let content = aggregate_stream(response.bytes_stream()).await?;
        Ok(Json(ChatCompletion::new(model, content)).into_response())
    }
}
