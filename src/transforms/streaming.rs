//! SSE stream transcoding.
//!
//! Upstream chat events are mostly OpenAI-compatible already and are forwarded
//! line by line. Two things need rewriting:
//! - `data.web.sources` payloads become one synthetic content delta
//! - generated images arrive as Markdown pointing at the upstream's internal
//!   host; once detected, the rest of the content is held back and replaced by
//!   a single event carrying the resolved download link just before `[DONE]`
//!
//! Telemetry and keep-alive payloads are dropped.

use async_stream::stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::{Value, json};
use std::future::Future;
use tracing::{debug, info, warn};

use super::common::{content_chunk, now_secs};
use super::sse::{DONE, LineBuffer, SseLine, classify};
use crate::constants::IMAGE_MARKER;
use crate::error::ProxyError;

/// Resolves generated-image Markdown to a durable download URL.
pub trait ImageResolver {
    fn resolve(&self, markdown: &str) -> impl Future<Output = Result<String, ProxyError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Content lines are forwarded as they arrive.
    Normal,
    /// An image result started; content is buffered until `[DONE]`.
    ImageAccumulating,
}

/// Outcome of feeding one upstream line.
#[derive(Debug, PartialEq)]
pub enum Step {
    Skip,
    Emit(Bytes),
    Finish(Finish),
}

/// What to send once the upstream reports `[DONE]`.
#[derive(Debug, PartialEq, Eq)]
pub enum Finish {
    /// Forward the sentinel unchanged.
    Done,
    /// The full text carries an image marker that must be resolved first.
    ResolveImage(String),
    /// Image mode was entered but no marker ever completed; release the buffer.
    Flush(String),
}

/// Per-request transcoding state.
#[derive(Debug)]
pub struct Transcoder {
    model: String,
    mode: Mode,
    full_text: String,
    image_buffer: String,
    emitted: bool,
}

fn frame(payload: &str) -> Bytes {
    Bytes::from(format!("data: {payload}\n\n"))
}

pub fn done_frame() -> Bytes {
    frame(DONE)
}

/// Keep-alive and telemetry payloads that carry no content.
fn is_noise(event: &Value) -> bool {
    if event.get("ping").is_some() {
        return true;
    }
    let Some(data) = event.get("data") else {
        return false;
    };
    data.get("analytics").is_some() || (data.get("operation").is_some() && data.get("message").is_some())
}

/// Markdown list for a `data.web.sources` payload, if any source is complete.
fn web_sources(event: &Value) -> Option<String> {
    let sources = event.pointer("/data/web/sources")?.as_array()?;
    let content: String = sources
        .iter()
        .filter_map(|source| {
            let title = source.get("title")?.as_str()?;
            let url = source.get("url")?.as_str()?;
            Some(format!("\n### {title}\n{url}\n"))
        })
        .collect();
    (!content.is_empty()).then_some(content)
}

/// Start of an image result inside a content fragment.
fn opens_image(fragment: &str) -> bool {
    fragment.contains("\n\n![") || fragment.contains("spc.unk")
}

impl Transcoder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            mode: Mode::Normal,
            full_text: String::new(),
            image_buffer: String::new(),
            emitted: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Every content fragment seen so far, forwarded or not.
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    pub fn on_line(&mut self, line: &str) -> Step {
        match classify(line) {
            SseLine::Other => Step::Skip,
            SseLine::Done => Step::Finish(self.finish()),
            SseLine::Data(payload) => self.on_payload(payload),
        }
    }

    fn on_payload(&mut self, payload: &str) -> Step {
        let event: Value = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping unparseable upstream line: {e}");
                return Step::Skip;
            }
        };

        if is_noise(&event) {
            debug!("Dropping control payload: {payload}");
            return Step::Skip;
        }

        if let Some(content) = web_sources(&event) {
            return Step::Emit(self.synthetic(&content));
        }

        let Some(choices) = event.get("choices").and_then(Value::as_array) else {
            return Step::Emit(self.forward(payload));
        };

        let fragments: Vec<&str> = choices
            .iter()
            .filter_map(|choice| choice.pointer("/delta/content")?.as_str())
            .collect();
        if fragments.is_empty() {
            return Step::Skip;
        }

        for fragment in fragments {
            self.full_text.push_str(fragment);
            if self.mode == Mode::Normal && opens_image(fragment) {
                info!("Image result detected, buffering until [DONE]");
                self.mode = Mode::ImageAccumulating;
            }
            if self.mode == Mode::ImageAccumulating {
                self.image_buffer.push_str(fragment);
            }
        }

        match self.mode {
            Mode::Normal => Step::Emit(self.forward(payload)),
            Mode::ImageAccumulating => Step::Skip,
        }
    }

    fn finish(&mut self) -> Finish {
        if self.full_text.contains(IMAGE_MARKER) {
            Finish::ResolveImage(self.full_text.clone())
        } else if self.mode == Mode::ImageAccumulating && !self.image_buffer.is_empty() {
            Finish::Flush(std::mem::take(&mut self.image_buffer))
        } else {
            Finish::Done
        }
    }

    fn forward(&mut self, payload: &str) -> Bytes {
        self.emitted = true;
        frame(payload)
    }

    /// A synthesized `chat.completion.chunk` carrying `content`.
    pub fn synthetic(&mut self, content: &str) -> Bytes {
        self.emitted = true;
        frame(&content_chunk(&self.model, now_secs(), content).to_string())
    }

    /// Closing events for a finished stream.
    ///
    /// A failed image resolution ends the stream with an error event when
    /// nothing has reached the caller yet, and with the bare sentinel otherwise.
    pub async fn finish_with<R>(&mut self, finish: Finish, resolver: &R) -> Vec<Bytes>
    where
        R: ImageResolver + Sync,
    {
        match finish {
            Finish::Done => vec![done_frame()],
            Finish::Flush(text) => vec![self.synthetic(&text), done_frame()],
            Finish::ResolveImage(text) => match resolver.resolve(&text).await {
                Ok(url) => {
                    let link = format!("\n\n![Image]({url})\n");
                    vec![self.synthetic(&link), done_frame()]
                }
                Err(e) => {
                    warn!("Image resolution failed: {e}");
                    if self.emitted {
                        vec![done_frame()]
                    } else {
                        vec![error_frame(&e)]
                    }
                }
            },
        }
    }
}

fn error_frame(error: &ProxyError) -> Bytes {
    let body = json!({
        "error": {
            "message": error.to_string(),
            "code": error.status().as_u16()
        }
    });
    frame(&body.to_string())
}

/// Transcode an upstream chat event stream into the caller-facing stream.
///
/// Each emitted event is yielded as soon as its line has been read; nothing is
/// buffered across lines except content held back in image mode.
pub fn transcode_stream<S, E, R>(
    body: S,
    model: String,
    resolver: R,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    R: ImageResolver + Send + Sync + 'static,
{
    stream! {
        let mut transcoder = Transcoder::new(model);
        let mut lines = LineBuffer::new();
        let mut body = std::pin::pin!(body);
        let mut ended = false;

        loop {
            let line = match lines.next_line() {
                Some(line) => line,
                None if ended => break,
                None => match body.next().await {
                    Some(Ok(chunk)) => {
                        lines.push(&chunk);
                        continue;
                    }
                    Some(Err(e)) => {
                        warn!("Upstream stream error: {e}");
                        yield Err(std::io::Error::other(e));
                        return;
                    }
                    None => {
                        ended = true;
                        match lines.finish() {
                            Some(line) => line,
                            None => break,
                        }
                    }
                },
            };

            match transcoder.on_line(&line) {
                Step::Skip => {}
                Step::Emit(event) => yield Ok(event),
                Step::Finish(finish) => {
                    debug!("Upstream finished after {} chars", transcoder.full_text().chars().count());
                    for event in transcoder.finish_with(finish, &resolver).await {
                        yield Ok(event);
                    }
                    return;
                }
            }
        }

        warn!("Upstream stream ended without [DONE] in {:?} mode", transcoder.mode());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::convert::Infallible;
    use std::sync::Mutex;

    struct FakeResolver {
        result: Result<String, String>,
        seen: Mutex<Vec<String>>,
    }

    impl FakeResolver {
        fn ok(url: &str) -> Self {
            Self {
                result: Ok(url.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                result: Err("storage response is missing getUrl".to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl ImageResolver for FakeResolver {
        async fn resolve(&self, markdown: &str) -> Result<String, ProxyError> {
            self.seen.lock().unwrap().push(markdown.to_string());
            self.result.clone().map_err(ProxyError::Resolution)
        }
    }

    impl ImageResolver for std::sync::Arc<FakeResolver> {
        async fn resolve(&self, markdown: &str) -> Result<String, ProxyError> {
            self.as_ref().resolve(markdown).await
        }
    }

    fn delta(content: &str) -> String {
        format!(
            "data: {}",
            json!({
                "id": "up-1",
                "object": "chat.completion.chunk",
                "choices": [{"index": 0, "delta": {"content": content}}]
            })
        )
    }

    async fn run(lines: &[String], resolver: FakeResolver) -> (Vec<String>, Vec<String>) {
        let resolver = std::sync::Arc::new(resolver);
        let body: String = lines.iter().map(|l| format!("{l}\n\n")).collect();
        let chunks: Vec<Result<Bytes, Infallible>> = body
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let out: Vec<String> = transcode_stream(stream::iter(chunks), "gpt-4o".into(), resolver.clone())
            .map(|event| String::from_utf8(event.unwrap().to_vec()).unwrap())
            .collect()
            .await;
        let seen = resolver.seen.lock().unwrap().clone();
        (out, seen)
    }

    fn content_of(event: &str) -> String {
        let payload = event.strip_prefix("data: ").unwrap().trim_end();
        let value: Value = serde_json::from_str(payload).unwrap();
        value["choices"][0]["delta"]["content"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_normal_lines_forwarded_verbatim() {
        let first = delta("Hello");
        let second = delta(", world");
        let (out, seen) = run(
            &[first.clone(), second.clone(), "data: [DONE]".into()],
            FakeResolver::ok("unused"),
        )
        .await;

        assert_eq!(
            out,
            vec![
                format!("{first}\n\n"),
                format!("{second}\n\n"),
                "data: [DONE]\n\n".to_string()
            ]
        );
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_image_mode_replaced_by_single_event() {
        let (out, seen) = run(
            &[
                delta("Here is "),
                delta("\n\n![Image](https://spc.unk/abc)"),
                delta(" enjoy"),
                "data: [DONE]".into(),
            ],
            FakeResolver::ok("https://cdn.example/abc.png"),
        )
        .await;

        assert_eq!(out.len(), 3);
        assert_eq!(content_of(&out[0]), "Here is ");
        assert_eq!(
            content_of(&out[1]),
            "\n\n![Image](https://cdn.example/abc.png)\n"
        );
        assert_eq!(out[2], "data: [DONE]\n\n");
        assert!(out.iter().all(|e| !e.contains("spc.unk")));
        assert_eq!(seen, vec!["Here is \n\n![Image](https://spc.unk/abc) enjoy"]);

        let synthetic: Value =
            serde_json::from_str(out[1].strip_prefix("data: ").unwrap().trim_end()).unwrap();
        assert_eq!(synthetic["object"], "chat.completion.chunk");
        assert_eq!(synthetic["model"], "gpt-4o");
        assert_eq!(synthetic["id"].as_str().unwrap().len(), 24);
        assert!(synthetic["choices"][0]["finish_reason"].is_null());
    }

    #[test]
    fn test_mode_transitions() {
        let mut transcoder = Transcoder::new("gpt-4o");
        assert!(matches!(transcoder.on_line(&delta("a")), Step::Emit(_)));
        assert_eq!(transcoder.mode(), Mode::Normal);

        assert_eq!(transcoder.on_line(&delta("see spc.unk/x")), Step::Skip);
        assert_eq!(transcoder.mode(), Mode::ImageAccumulating);
        assert_eq!(transcoder.on_line(&delta("more")), Step::Skip);
        assert_eq!(transcoder.full_text(), "asee spc.unk/xmore");

        assert_eq!(
            transcoder.on_line("data: [DONE]"),
            Step::Finish(Finish::Flush("see spc.unk/xmore".into()))
        );
    }

    #[tokio::test]
    async fn test_image_mode_without_marker_flushes_buffer() {
        let (out, seen) = run(
            &[delta("text"), delta("\n\n![chart]"), delta(" tail"), "data: [DONE]".into()],
            FakeResolver::ok("unused"),
        )
        .await;

        assert_eq!(out.len(), 3);
        assert_eq!(content_of(&out[1]), "\n\n![chart] tail");
        assert_eq!(out[2], "data: [DONE]\n\n");
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_noise_dropped() {
        let (out, _) = run(
            &[
                r#"data: {"ping": true}"#.into(),
                r#"data: {"data": {"analytics": {"event": "x"}}}"#.into(),
                r#"data: {"data": {"operation": "save", "message": "ok"}}"#.into(),
                "event: message".into(),
                "data: {not json".into(),
                "data: [DONE]".into(),
            ],
            FakeResolver::ok("unused"),
        )
        .await;

        assert_eq!(out, vec!["data: [DONE]\n\n".to_string()]);
    }

    #[tokio::test]
    async fn test_web_sources_become_one_event() {
        let sources = json!({
            "data": {"web": {"sources": [
                {"title": "Rust", "url": "https://rust-lang.org"},
                {"title": "No url"},
                {"title": "Docs", "url": "https://docs.rs"}
            ]}}
        });
        let (out, _) = run(
            &[format!("data: {sources}"), delta("after"), "data: [DONE]".into()],
            FakeResolver::ok("unused"),
        )
        .await;

        assert_eq!(out.len(), 3);
        assert_eq!(
            content_of(&out[0]),
            "\n### Rust\nhttps://rust-lang.org\n\n### Docs\nhttps://docs.rs\n"
        );
        assert_eq!(content_of(&out[1]), "after");
    }

    #[tokio::test]
    async fn test_payload_without_choices_passes_through() {
        let (out, _) = run(
            &[
                r#"data: {"status": "queued"}"#.into(),
                r#"data: {"choices": [{"delta": {}}]}"#.into(),
                "data: [DONE]".into(),
            ],
            FakeResolver::ok("unused"),
        )
        .await;

        assert_eq!(
            out,
            vec![
                "data: {\"status\": \"queued\"}\n\n".to_string(),
                "data: [DONE]\n\n".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_resolution_failure_before_output_sends_error() {
        let (out, _) = run(
            &[delta("\n\n![Image](https://spc.unk/abc)"), "data: [DONE]".into()],
            FakeResolver::failing(),
        )
        .await;

        assert_eq!(out.len(), 1);
        let payload: Value =
            serde_json::from_str(out[0].strip_prefix("data: ").unwrap().trim_end()).unwrap();
        assert_eq!(payload["error"]["code"], 500);
        assert!(!out[0].contains("[DONE]"));
    }

    #[tokio::test]
    async fn test_resolution_failure_after_output_forwards_done() {
        let (out, _) = run(
            &[
                delta("Here is "),
                delta("\n\n![Image](https://spc.unk/abc)"),
                "data: [DONE]".into(),
            ],
            FakeResolver::failing(),
        )
        .await;

        assert_eq!(out.len(), 2);
        assert_eq!(content_of(&out[0]), "Here is ");
        assert_eq!(out[1], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_lines_after_done_ignored() {
        let (out, _) = run(
            &["data: [DONE]".into(), delta("late")],
            FakeResolver::ok("unused"),
        )
        .await;
        assert_eq!(out, vec!["data: [DONE]\n\n".to_string()]);
    }

    #[tokio::test]
    async fn test_body_error_ends_stream() {
        let chunks = vec![
            Ok(Bytes::from(format!("{}\n\n", delta("hi")))),
            Err(std::io::Error::other("reset")),
        ];
        let out: Vec<Result<Bytes, std::io::Error>> = transcode_stream(
            stream::iter(chunks),
            "gpt-4o".into(),
            FakeResolver::ok("unused"),
        )
        .collect()
        .await;

        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(out[1].is_err());
    }
}
