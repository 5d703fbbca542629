//! Signed calls to the upstream chat service.
//!
//! - `client`: request signing, static headers, chat and speech calls
//! - `images`: image upload, Markdown path extraction, storage resolution, download
//! - `web`: page text fetching for URLs found in user messages

pub mod client;
pub mod images;
pub mod web;

pub use client::UpstreamClient;
