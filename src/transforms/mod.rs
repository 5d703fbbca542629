//! Request/response transformations between the OpenAI surface and the upstream.
//!
//! This module provides:
//! - `normalize`: OpenAI chat request → upstream chat body
//! - `streaming`: upstream events → caller SSE, with image-result rewriting
//! - `aggregate`: upstream events → one `chat.completion`
//! - `sse`: line framing shared by both consumers
//! - `common`: ids, fingerprints, timestamps, synthetic chunks

pub mod aggregate;
pub mod common;
pub mod normalize;
pub mod sse;
pub mod streaming;

pub use aggregate::{ChatCompletion, aggregate_stream};
pub use normalize::{ChatRequest, normalize_request};
pub use streaming::transcode_stream;
