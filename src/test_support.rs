//! Fake upstream servers and request helpers for tests.

use axum::{Router, response::Response};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::upstream::UpstreamClient;
use crate::{AppState, build_router};

/// Serve `app` on an ephemeral local port; returns its base URL.
pub async fn spawn_upstream(app: Router) -> String {
    spawn_upstream_fn(|_| app).await
}

/// Like `spawn_upstream`, for routers that need to know their own base URL.
pub async fn spawn_upstream_fn(build: impl FnOnce(String) -> Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = build(base.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

pub fn test_config(upstream_url: &str) -> Config {
    let upstream_url = upstream_url.to_string();
    Config::from_lookup(move |key| match key {
        "KEY_A" => Some("test-key-a".to_string()),
        "KEY_B" => Some("test-key-b".to_string()),
        "USER_AGENT" => Some("chat-gateway-tests/1.0".to_string()),
        "GATEWAY_UPSTREAM_URL" => Some(upstream_url.clone()),
        _ => None,
    })
    .unwrap()
}

pub fn test_client(upstream_url: &str) -> UpstreamClient {
    UpstreamClient::new(reqwest::Client::new(), &test_config(upstream_url))
}

/// Gateway router wired to a fake upstream.
pub async fn app_with_upstream(upstream: Router) -> Router {
    app_with_upstream_fn(|_| upstream).await
}

pub async fn app_with_upstream_fn(build: impl FnOnce(String) -> Router) -> Router {
    let base = spawn_upstream_fn(build).await;
    let config = test_config(&base);
    let state = Arc::new(AppState::new(reqwest::Client::new(), &config));
    build_router(state, &config.cors_mode)
}

pub async fn read_body(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn read_json(response: Response) -> Value {
    serde_json::from_str(&read_body(response).await).unwrap()
}
