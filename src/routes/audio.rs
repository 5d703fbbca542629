use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::header,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::AppState;
use crate::error::ProxyError;

const DEFAULT_TTS_MODEL: &str = "tts-1-hd";

#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    pub input: Option<String>,
    pub response_format: Option<String>,
    pub voice: Option<String>,
    pub model: Option<String>,
    pub speed: Option<f64>,
    pub stream: Option<bool>,
}

/// Body forwarded to the upstream speech endpoint.
#[derive(Debug, PartialEq, Serialize)]
pub struct UpstreamSpeech {
    pub input: String,
    pub response_format: String,
    pub voice: String,
    pub model: String,
    pub speed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl SpeechRequest {
    pub fn into_upstream(self) -> Result<UpstreamSpeech, ProxyError> {
        let input = self
            .input
            .filter(|i| !i.trim().is_empty())
            .ok_or_else(|| ProxyError::InvalidRequest("Missing required field: input".to_string()))?;

        let model = self
            .model
            .filter(|m| m.starts_with("tts-1"))
            .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string());

        Ok(UpstreamSpeech {
            input,
            response_format: self.response_format.unwrap_or_else(|| "mp3".to_string()),
            voice: self.voice.unwrap_or_else(|| "nova".to_string()),
            model,
            speed: self.speed.unwrap_or(1.0),
            stream: self.stream,
        })
    }
}

pub async fn speech(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SpeechRequest>, JsonRejection>,
) -> Result<Response, ProxyError> {
    let Json(request) = body.map_err(|e| ProxyError::InvalidRequest(e.body_text()))?;
    let upstream = request.into_upstream()?;
    info!(
        "Speech request: model={}, voice={}, {} chars",
        upstream.model,
        upstream.voice,
        upstream.input.chars().count()
    );

    let audio = state.upstream.speech(&upstream).await.map_err(|e| match e {
        ProxyError::Upstream { status, message } => ProxyError::Upstream {
            status: 502,
            message: format!("Speech service returned {status}: {message}"),
        },
        other => other,
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::ACCEPT_RANGES, "bytes"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"output.mp3\""),
        ],
        audio,
    )
        .into_response())
}
