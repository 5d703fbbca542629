use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, header};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::constants::{ACCEPT_LANGUAGE, CHAT_PATH, CL_OPTIONS, CLIENT_TIME_ZONE, SPEECH_PATH};
use crate::error::ProxyError;
use crate::signing::{Signer, timestamp};

/// Shared upstream client. Cheap to clone; safe for concurrent use.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    signer: Arc<Signer>,
    base_url: String,
    user_agent: String,
    chat_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(http: Client, config: &Config) -> Self {
        Self {
            http,
            signer: Arc::new(Signer::new(config.credentials.clone())),
            base_url: config.upstream_url.clone(),
            user_agent: config.user_agent.clone(),
            chat_timeout: config.upstream_timeout,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    /// Build a request carrying the signature and the static headers.
    ///
    /// `signed_body` must be exactly the bytes the signature covers; the caller
    /// attaches the body itself. reqwest adds `Accept-Encoding: gzip` and
    /// decodes gzip responses transparently.
    pub fn signed_request(&self, method: Method, path: &str, signed_body: &[u8]) -> RequestBuilder {
        let date = timestamp();
        let token = self.signer.sign(signed_body, path, &date, method.as_str());

        self.http
            .request(method, self.url(path))
            .header(header::DATE, date)
            .header("Client-time-zone", CLIENT_TIME_ZONE)
            .header(header::AUTHORIZATION, token)
            .header(header::USER_AGENT, &self.user_agent)
            .header(header::ACCEPT_LANGUAGE, ACCEPT_LANGUAGE)
            .header("X-Cl-Options", CL_OPTIONS)
    }

    /// POST a signed JSON body; the serialized bytes are signed and sent as-is.
    async fn post_json<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<Response, ProxyError> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| ProxyError::ParseError(format!("Failed to encode request: {e}")))?;
        debug!("POST {path}: {}", String::from_utf8_lossy(&bytes));

        let response = self
            .signed_request(Method::POST, path, &bytes)
            .header(header::CONTENT_TYPE, "application/json; charset=UTF-8")
            .timeout(timeout)
            .body(bytes)
            .send()
            .await?;

        ensure_success(response).await
    }

    /// Open the upstream chat event stream.
    pub async fn chat<T: Serialize>(&self, body: &T) -> Result<Response, ProxyError> {
        self.post_json(CHAT_PATH, body, self.chat_timeout).await
    }

    /// Synthesize speech; returns the raw audio bytes.
    pub async fn speech<T: Serialize>(&self, body: &T) -> Result<bytes::Bytes, ProxyError> {
        let response = self.post_json(SPEECH_PATH, body, self.chat_timeout).await?;
        Ok(response.bytes().await?)
    }
}

/// Turn any non-200 upstream response into `ProxyError::Upstream`.
pub(crate) async fn ensure_success(response: Response) -> Result<Response, ProxyError> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    warn!("Upstream returned {status}: {text}");
    let message = if text.is_empty() {
        format!("API error: {}", status.as_u16())
    } else {
        text
    };
    Err(ProxyError::Upstream {
        status: status.as_u16(),
        message,
    })
}
