//! Inbound request normalization.
//!
//! Converts an OpenAI-style chat request into the upstream chat body:
//! - Flattens structured content parts into a single text string
//! - Uploads inline images and attaches image references
//! - Appends fetched page text for URLs found in user messages
//! - Guarantees exactly one system message carrying the web-search instruction
//! - Maps the requested model onto the supported allow-list

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::constants::{
    DEFAULT_MAX_TOKENS, MODELS, SOURCE_CHAT, SOURCE_IMAGE_GEN, SOURCE_IMAGE_UPLOAD,
    SYSTEM_INSTRUCTION,
};
use crate::error::ProxyError;
use crate::upstream::images::{DataImage, ImageRef};

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[A-Za-z0-9\-._~:/?#\[\]@!$&'()*+,;=%]+").expect("valid URL pattern")
});

// ============================================================================
// Inbound (OpenAI) Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    pub max_tokens: Option<u32>,
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "developer")]
    System,
    User,
    Assistant,
}

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Content,
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
    #[default]
    Null,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

// ============================================================================
// Upstream Request Types
// ============================================================================

/// Upstream routing selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Source {
    #[serde(rename = "chat/free")]
    Chat,
    #[serde(rename = "chat/image_upload")]
    ImageUpload,
    #[serde(rename = "chat/pro_image")]
    ImageGeneration,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Chat => SOURCE_CHAT,
            Source::ImageUpload => SOURCE_IMAGE_UPLOAD,
            Source::ImageGeneration => SOURCE_IMAGE_GEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamImage {
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpstreamMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<UpstreamImage>,
}

impl UpstreamMessage {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamChatBody {
    pub function_image_gen: bool,
    pub function_web_search: bool,
    pub web_search_engine: &'static str,
    pub max_tokens: u32,
    pub model: String,
    pub source: Source,
    pub messages: Vec<UpstreamMessage>,
}

impl UpstreamChatBody {
    pub fn new(model: String, max_tokens: u32, source: Source, messages: Vec<UpstreamMessage>) -> Self {
        Self {
            function_image_gen: true,
            function_web_search: true,
            web_search_engine: "auto",
            max_tokens,
            model,
            source,
            messages,
        }
    }
}

/// A request ready to sign and send.
#[derive(Debug)]
pub struct NormalizedRequest {
    pub body: UpstreamChatBody,
    pub stream: bool,
    pub has_image: bool,
}

// ============================================================================
// Side channel used during normalization
// ============================================================================

/// External calls the normalizer needs to resolve embedded references.
pub trait SideChannel {
    /// Fetch the readable text behind a URL.
    fn fetch_url(&self, url: &str) -> impl Future<Output = Result<String, ProxyError>> + Send;

    /// Upload an inline image and return an accessible URL.
    fn upload_image(
        &self,
        image: DataImage,
    ) -> impl Future<Output = Result<String, ProxyError>> + Send;
}

// ============================================================================
// Normalization
// ============================================================================

/// Map a requested model onto the allow-list.
///
/// Unknown models are silently replaced by `default_model` rather than rejected.
pub fn resolve_model(requested: Option<&str>, default_model: &str) -> String {
    let Some(requested) = requested else {
        return default_model.to_string();
    };

    let lower = requested.trim().to_lowercase();
    let model = match lower.as_str() {
        "claude-3.5-sonnet" => "claude-3-5-sonnet",
        "gpt 4o" => "gpt-4o",
        other => other,
    };

    if MODELS.contains(&model) {
        model.to_string()
    } else {
        debug!("Unsupported model {requested:?}, using {default_model}");
        default_model.to_string()
    }
}

/// Prefix the web-search instruction unless it is already present.
pub fn ensure_instruction(content: &str) -> String {
    if content.contains(SYSTEM_INSTRUCTION) {
        content.to_string()
    } else if content.is_empty() {
        SYSTEM_INSTRUCTION.to_string()
    } else {
        format!("{SYSTEM_INSTRUCTION}\n{content}")
    }
}

/// Distinct HTTP(S) URLs in order of first appearance.
pub fn find_urls(text: &str) -> Vec<&str> {
    let mut urls: Vec<&str> = Vec::new();
    for m in URL_PATTERN.find_iter(text) {
        if !urls.contains(&m.as_str()) {
            urls.push(m.as_str());
        }
    }
    urls
}

pub async fn normalize_request<C>(
    req: ChatRequest,
    default_model: &str,
    side: &C,
) -> Result<NormalizedRequest, ProxyError>
where
    C: SideChannel + Sync,
{
    let mut messages: Vec<UpstreamMessage> = Vec::new();
    let mut system_parts: Vec<String> = Vec::new();
    let mut system_images: Vec<UpstreamImage> = Vec::new();
    let mut system_index: Option<usize> = None;
    let mut has_image = false;
    let mut fetched: HashMap<String, Option<String>> = HashMap::new();

    for msg in req.messages {
        let (mut text, images, plain) = match msg.content {
            Content::Text(text) => (text.trim().to_string(), Vec::new(), true),
            Content::Parts(parts) => {
                let (text, images) = flatten_parts(parts, side).await?;
                (text, images, false)
            }
            Content::Null => (String::new(), Vec::new(), false),
        };

        if text.is_empty() && images.is_empty() {
            debug!("Dropping {:?} message with empty content", msg.role);
            continue;
        }
        has_image |= !images.is_empty();

        match msg.role {
            Role::System => {
                if system_index.is_none() {
                    system_index = Some(messages.len());
                    messages.push(UpstreamMessage::text(Role::System, String::new()));
                }
                if !text.is_empty() {
                    system_parts.push(text);
                }
                system_images.extend(images);
            }
            Role::User if plain => {
                let urls: Vec<String> = find_urls(&text).into_iter().map(str::to_string).collect();
                for url in &urls {
                    if !fetched.contains_key(url) {
                        let page = match side.fetch_url(url).await {
                            Ok(page) if !page.is_empty() => Some(page),
                            Ok(_) => None,
                            Err(e) => {
                                warn!("Failed to fetch {url}: {e}");
                                None
                            }
                        };
                        fetched.insert(url.clone(), page);
                    }
                    if let Some(Some(page)) = fetched.get(url) {
                        text.push_str("\n\n");
                        text.push_str(page);
                    }
                }
                messages.push(UpstreamMessage::text(Role::User, text));
            }
            role => messages.push(UpstreamMessage {
                role,
                content: text,
                images,
            }),
        }
    }

    if messages.is_empty() {
        return Err(ProxyError::InvalidRequest(
            "All messages have empty content".to_string(),
        ));
    }

    let system = UpstreamMessage {
        role: Role::System,
        content: ensure_instruction(&system_parts.join("\n\n")),
        images: system_images,
    };
    match system_index {
        Some(index) => messages[index] = system,
        None => messages.insert(0, system),
    }

    let model = resolve_model(req.model.as_deref(), default_model);
    let source = if has_image {
        Source::ImageUpload
    } else {
        Source::Chat
    };

    Ok(NormalizedRequest {
        body: UpstreamChatBody::new(
            model,
            req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            source,
            messages,
        ),
        stream: req.stream.unwrap_or(false),
        has_image,
    })
}

/// Join text parts with spaces and resolve image parts to accessible URLs.
async fn flatten_parts<C>(
    parts: Vec<ContentPart>,
    side: &C,
) -> Result<(String, Vec<UpstreamImage>), ProxyError>
where
    C: SideChannel + Sync,
{
    let mut texts: Vec<String> = Vec::new();
    let mut images: Vec<UpstreamImage> = Vec::new();

    for part in parts {
        match part {
            ContentPart::Text { text } => texts.push(text),
            ContentPart::ImageUrl { image_url } => {
                let url = match ImageRef::parse(&image_url.url)? {
                    ImageRef::Inline(image) => {
                        let url = side.upload_image(image).await?;
                        info!("Uploaded inline image: {url}");
                        url
                    }
                    ImageRef::Remote(url) => url,
                };
                images.push(UpstreamImage { data: url });
            }
            ContentPart::Unsupported => {}
        }
    }

    Ok((texts.join(" ").trim().to_string(), images))
}
