/// Default upstream origin (overridable with `GATEWAY_UPSTREAM_URL`)
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.chaton.ai";

/// Upstream chat streaming path (also the signed path)
pub const CHAT_PATH: &str = "/chats/stream";

/// Upstream image upload path
pub const UPLOAD_PATH: &str = "/storage/upload";

/// Upstream storage lookup prefix; the image path is appended
pub const STORAGE_PATH: &str = "/storage/";

/// Upstream web page fetch prefix; the base64 URL is appended
pub const URLS_PATH: &str = "/urls/";

/// Upstream text-to-speech path
pub const SPEECH_PATH: &str = "/audio/speech";

/// Internal host the upstream uses for freshly generated images
pub const IMAGE_HOST: &str = "https://spc.unk/";

/// Marker that identifies an image result in the streamed Markdown
pub const IMAGE_MARKER: &str = "![Image](https://spc.unk/";

/// Fixed client time zone header value expected by the upstream
pub const CLIENT_TIME_ZONE: &str = "-04:00";

/// Fixed locale header value
pub const ACCEPT_LANGUAGE: &str = "en-US";

/// Feature-flag header value
pub const CL_OPTIONS: &str = "hb";

/// Instruction every upstream conversation must carry in its system message
pub const SYSTEM_INSTRUCTION: &str = "This dialog contains a call to the web search function. Use it only when you need to get up-to-date data or data that is not in your training database.";

/// System prompt for the image generation endpoint
pub const IMAGE_SYSTEM_PROMPT: &str = "Your role is that of a smart and creative assistant. Do not mention that you are a chatbot or AI assistant. Consider the terms when communicating: 1. The length of your response: Auto. 2. The tone style of your speech: Default. This dialog box has an option to generate images. The function should be called only when the user explicitly requests it - for example, using any related words associated with image generation requests. In other cases - the call of the image generation function should not be called.";

/// Model used for image generation requests
pub const IMAGE_MODEL: &str = "gpt-4o";

/// Routing sources understood by the upstream
pub const SOURCE_CHAT: &str = "chat/free";
pub const SOURCE_IMAGE_UPLOAD: &str = "chat/image_upload";
pub const SOURCE_IMAGE_GEN: &str = "chat/pro_image";

/// Default max tokens when the caller does not send one
pub const DEFAULT_MAX_TOKENS: u32 = 8000;

/// Fallback model when the configured default is not supported
pub const FALLBACK_MODEL: &str = "gpt-4o";

/// Placeholder prompt token count reported in batch responses
pub const PROMPT_TOKENS_PLACEHOLDER: u32 = 16;

/// Supported models
pub static MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "claude",
    "claude-3-haiku",
    "claude-3-5-sonnet",
    "claude-3-7-sonnet",
    "sonar-reasoning-pro",
    "deepseek-r1",
];
