use std::env;
use std::time::Duration;

use dotenvy::dotenv;
use tracing::warn;

use crate::constants::{DEFAULT_UPSTREAM_URL, FALLBACK_MODEL, MODELS};

const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// CORS configuration mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsMode {
    /// Allow all origins (default, the gateway is a public compatibility shim)
    AllowAll,
    /// Only allow localhost origins
    LocalhostOnly,
    /// Allow specific origins (comma-separated list)
    AllowList(Vec<String>),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Key material used to sign upstream requests.
#[derive(Clone)]
pub struct Credentials {
    pub key_a: Vec<u8>,
    pub key_b: Vec<u8>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub user_agent: String,
    pub upstream_url: String,
    pub default_model: String,
    pub upstream_timeout: Duration,
    pub cors_mode: CorsMode,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let key_a = required("KEY_A")?;
        let key_b = required("KEY_B")?;
        let user_agent = required("USER_AGENT")?;

        let host = lookup("GATEWAY_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = lookup("GATEWAY_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let upstream_url = lookup("GATEWAY_UPSTREAM_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string());

        let default_model = match lookup("GATEWAY_DEFAULT_MODEL") {
            Some(m) if MODELS.contains(&m.as_str()) => m,
            Some(m) => {
                warn!("GATEWAY_DEFAULT_MODEL={m} is not a supported model, using {FALLBACK_MODEL}");
                FALLBACK_MODEL.to_string()
            }
            None => FALLBACK_MODEL.to_string(),
        };

        let upstream_timeout = Duration::from_secs(
            lookup("GATEWAY_UPSTREAM_TIMEOUT_SECS")
                .and_then(|t| t.parse().ok())
                .filter(|t| *t > 0)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        );

        // CORS configuration: "*" (default), "localhost", or comma-separated origins
        let cors_mode = match lookup("GATEWAY_CORS_ORIGINS").as_deref() {
            Some("localhost") => CorsMode::LocalhostOnly,
            Some(origins) if !origins.is_empty() && origins != "*" => {
                CorsMode::AllowList(origins.split(',').map(|s| s.trim().to_string()).collect())
            }
            _ => CorsMode::AllowAll,
        };

        Ok(Self {
            host,
            port,
            credentials: Credentials {
                key_a: key_a.into_bytes(),
                key_b: key_b.into_bytes(),
            },
            user_agent,
            upstream_url,
            default_model,
            upstream_timeout,
            cors_mode,
        })
    }
}
