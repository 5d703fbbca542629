use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Image resolution failed: {0}")]
    Resolution(String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ProxyError::Network(_) | ProxyError::ParseError(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Resolution(_) | ProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert error to OpenAI-compatible error response
    pub fn to_openai_response(&self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        self.to_openai_response()
    }
}
