use axum::{extract::State, response::Json};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::{AppState, BUILD_TIME, GIT_HASH, VERSION};

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "default_model": state.default_model,
    }))
}

pub async fn version() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": VERSION,
        "git_hash": GIT_HASH,
        "build_time": BUILD_TIME,
    }))
}
