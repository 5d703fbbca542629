//! Web page fetching through the upstream's `/urls/` endpoint.
//!
//! The reply is an event stream; the page text is the concatenation of every
//! `data.content_delta` string.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use futures_util::StreamExt;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::client::{UpstreamClient, ensure_success};
use crate::constants::URLS_PATH;
use crate::error::ProxyError;
use crate::transforms::sse::{LineBuffer, SseLine, classify};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Signed path for a page fetch: `/urls/{base64(url)}`.
pub fn page_path(url: &str) -> String {
    format!("{URLS_PATH}{}", BASE64.encode(url))
}

/// Appends `data.content_delta` from each event line.
#[derive(Debug, Default)]
struct PageText {
    text: String,
}

impl PageText {
    fn feed(&mut self, line: &str) {
        let SseLine::Data(payload) = classify(line) else {
            return;
        };
        let Ok(event) = serde_json::from_str::<Value>(payload) else {
            return;
        };
        if let Some(delta) = event
            .get("data")
            .and_then(|d| d.get("content_delta"))
            .and_then(Value::as_str)
        {
            self.text.push_str(delta);
        }
    }
}

impl UpstreamClient {
    /// Fetch the readable text of `url`.
    pub async fn fetch_page(&self, url: &str) -> Result<String, ProxyError> {
        let path = page_path(url);
        let response = self
            .signed_request(Method::GET, &path, b"")
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let mut page = PageText::default();
        let mut lines = LineBuffer::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            lines.push(&chunk?);
            while let Some(line) = lines.next_line() {
                page.feed(&line);
            }
        }
        if let Some(line) = lines.finish() {
            page.feed(&line);
        }

        debug!("Fetched {} chars from {url}", page.text.len());
        Ok(page.text)
    }
}
