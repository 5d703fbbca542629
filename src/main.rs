mod config;
mod constants;
mod error;
mod routes;
mod signing;
mod transforms;
mod upstream;

#[cfg(test)]
mod test_support;

use axum::ServiceExt;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use clap::Parser;
use config::{Config, CorsMode};
use reqwest::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::normalize_path::NormalizePath;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upstream::UpstreamClient;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");
pub const BUILD_TIME: &str = env!("BUILD_TIME");

/// Shared, read-only per-process state.
pub struct AppState {
    pub upstream: UpstreamClient,
    pub default_model: String,
}

impl AppState {
    pub fn new(http_client: Client, config: &Config) -> Self {
        Self {
            upstream: UpstreamClient::new(http_client, config),
            default_model: config.default_model.clone(),
        }
    }
}

#[derive(Parser)]
#[command(name = "chat-gateway")]
#[command(about = "OpenAI-compatible gateway for a signed upstream chat API")]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, env = "GATEWAY_HOST")]
    host: Option<String>,

    /// Port to bind to
    #[arg(short, long, env = "GATEWAY_PORT")]
    port: Option<u16>,
}

fn cors_layer(cors_mode: &CorsMode) -> CorsLayer {
    let cors_origins = cors_mode.clone();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let Ok(origin_str) = origin.to_str() else {
                return false;
            };

            match &cors_origins {
                CorsMode::AllowAll => true,
                CorsMode::LocalhostOnly => {
                    let Ok(url) = url::Url::parse(origin_str) else {
                        return false;
                    };
                    matches!(
                        url.host_str(),
                        Some("localhost") | Some("127.0.0.1") | Some("[::1]")
                    )
                }
                CorsMode::AllowList(allowed) => allowed.iter().any(|a| a == origin_str),
            }
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// All routes with CORS applied; trailing-slash normalization wraps this in `main`.
pub fn build_router(state: Arc<AppState>, cors_mode: &CorsMode) -> Router {
    let api_routes = Router::new()
        .route(
            "/chat/completions",
            post(routes::openai::chat_completions)
                .get(routes::openai::welcome)
                .options(routes::openai::preflight),
        )
        .route(
            "/models",
            get(routes::openai::list_models).options(routes::openai::preflight),
        )
        .route(
            "/images/generations",
            post(routes::images::generations).options(routes::openai::preflight),
        )
        .route(
            "/audio/speech",
            post(routes::audio::speech).options(routes::openai::preflight),
        );

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/version", get(routes::health::version))
        .nest("/v1", api_routes)
        .layer(cors_layer(cors_mode))
        .with_state(state)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Loads .env before clap reads GATEWAY_HOST / GATEWAY_PORT
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    let args = Args::parse();

    let host = args.host.unwrap_or_else(|| config.host.clone());
    let port = args.port.unwrap_or(config.port);

    // Shared HTTP client with connection pooling; timeouts are set per request
    let http_client = Client::builder()
        .pool_max_idle_per_host(10)
        .build()
        .expect("Failed to create HTTP client");

    let state = Arc::new(AppState::new(http_client, &config));

    match &config.cors_mode {
        CorsMode::AllowAll => info!("CORS: Allowing all origins"),
        CorsMode::LocalhostOnly => info!("CORS: Localhost only"),
        CorsMode::AllowList(list) => info!("CORS: Allowing origins: {:?}", list),
    }

    let app = NormalizePath::trim_trailing_slash(build_router(state, &config.cors_mode));

    let addr: SocketAddr = match format!("{}:{}", host, port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid bind address {host}:{port}: {e}");
            std::process::exit(1);
        }
    };
    info!(
        "Starting chat-gateway v{}-{} (built {})",
        VERSION, GIT_HASH, BUILD_TIME
    );
    info!("Upstream: {}", config.upstream_url);
    info!("Default model: {}", config.default_model);
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        ServiceExt::<axum::extract::Request>::into_make_service(app),
    )
    .await
    .expect("Server error");
}
