//! Image side channel.
//!
//! Outbound: inline data-URI images are uploaded to upstream storage and
//! replaced by the returned URL. Inbound: generated images arrive as Markdown
//! pointing at the upstream's internal host and are exchanged for a durable
//! download URL through a storage lookup.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use regex::Regex;
use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::info;

use super::client::{UpstreamClient, ensure_success};
use crate::constants::{IMAGE_HOST, STORAGE_PATH, UPLOAD_PATH};
use crate::error::ProxyError;
use crate::transforms::common::now_millis;
use crate::transforms::normalize::SideChannel;
use crate::transforms::streaming::ImageResolver;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const STORAGE_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

static MARKDOWN_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[.*?\]\((.*?)\)").expect("valid Markdown image pattern"));

/// Decoded inline image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataImage {
    pub bytes: Vec<u8>,
    /// File extension; `jpg` for JPEG images.
    pub extension: String,
}

impl DataImage {
    pub fn content_type(&self) -> String {
        match self.extension.as_str() {
            "jpg" => "image/jpeg".to_string(),
            ext => format!("image/{ext}"),
        }
    }

    pub fn file_name(&self, unix_millis: u128) -> String {
        format!("{unix_millis}.{}", self.extension)
    }
}

/// An image reference found in an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// `data:image/...;base64,...`
    Inline(DataImage),
    /// Any other URL, forwarded as-is.
    Remote(String),
}

impl ImageRef {
    pub fn parse(url: &str) -> Result<Self, ProxyError> {
        let Some(subtype) = url.strip_prefix("data:image/") else {
            return Ok(ImageRef::Remote(url.to_string()));
        };

        let Some((_, payload)) = url.split_once("base64,") else {
            return Err(ProxyError::InvalidRequest(
                "Inline image is not base64-encoded".to_string(),
            ));
        };
        let payload: String = payload
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let bytes = BASE64
            .decode(payload)
            .map_err(|e| ProxyError::InvalidRequest(format!("Invalid inline image data: {e}")))?;

        let extension = match subtype.split([';', ',']).next().unwrap_or_default() {
            "png" => "png",
            "jpeg" | "jpg" | "" => "jpg",
            other => other,
        };

        Ok(ImageRef::Inline(DataImage {
            bytes,
            extension: extension.to_string(),
        }))
    }
}

/// Target of the first Markdown image in `markdown`.
pub fn extract_markdown_path(markdown: &str) -> Result<String, ProxyError> {
    MARKDOWN_IMAGE
        .captures(markdown)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|path| !path.is_empty())
        .ok_or_else(|| ProxyError::Resolution("No image path found in Markdown".to_string()))
}

/// Strip the internal image host from an extracted path.
pub fn storage_key(path: &str) -> &str {
    path.strip_prefix(IMAGE_HOST).unwrap_or(path)
}

#[derive(Debug, Deserialize)]
struct GetUrlResponse {
    #[serde(rename = "getUrl")]
    get_url: Option<String>,
}

fn get_url(response: GetUrlResponse, what: &str) -> Result<String, ProxyError> {
    response
        .get_url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ProxyError::Resolution(format!("{what} response is missing getUrl")))
}

impl UpstreamClient {
    /// Upload image bytes and return the upstream's `getUrl`.
    ///
    /// The upload signature covers an empty body.
    pub async fn upload(&self, image: &DataImage) -> Result<String, ProxyError> {
        let part = Part::bytes(image.bytes.clone())
            .file_name(image.file_name(now_millis()))
            .mime_str(&image.content_type())?;
        let form = Form::new().part("file", part);

        let response = self
            .signed_request(Method::POST, UPLOAD_PATH, b"")
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let body: GetUrlResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::ParseError(format!("Invalid upload response: {e}")))?;
        get_url(body, "Upload")
    }

    /// Exchange a storage key for a durable download URL.
    pub async fn storage_url(&self, key: &str) -> Result<String, ProxyError> {
        let response = self
            .http()
            .get(self.url(&format!("{STORAGE_PATH}{key}")))
            .timeout(STORAGE_TIMEOUT)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let body: GetUrlResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::Resolution(format!("Invalid storage response: {e}")))?;
        get_url(body, "Storage")
    }

    /// Resolve the first Markdown image in `markdown` to a download URL.
    pub async fn resolve_markdown_image(&self, markdown: &str) -> Result<String, ProxyError> {
        let path = extract_markdown_path(markdown)?;
        let url = self.storage_url(storage_key(&path)).await?;
        info!("Resolved image {path} -> {url}");
        Ok(url)
    }

    /// Download raw bytes from an arbitrary URL.
    pub async fn download(&self, url: &str) -> Result<Bytes, ProxyError> {
        let response = self
            .http()
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.bytes().await?)
    }
}

impl SideChannel for UpstreamClient {
    async fn fetch_url(&self, url: &str) -> Result<String, ProxyError> {
        self.fetch_page(url).await
    }

    async fn upload_image(&self, image: DataImage) -> Result<String, ProxyError> {
        self.upload(&image).await
    }
}

impl ImageResolver for UpstreamClient {
    async fn resolve(&self, markdown: &str) -> Result<String, ProxyError> {
        self.resolve_markdown_image(markdown).await
    }
}
