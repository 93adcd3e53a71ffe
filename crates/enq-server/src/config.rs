//! Environment configuration, matching the original system's config
//! struct field-for-field (`APP_ENV`, `API_ADDR`, `SCHED_ADDR`,
//! `POSTGRES_DSN`, `REDIS_ADDR`, `REDIS_PASSWORD`, `JWT_SIGNING_KEY`,
//! `DEFAULT_VISIBILITY_TIMEOUT_SEC`).

use std::env;

/// Process-wide configuration, loaded once at startup and shared by both
/// the API and scheduler binaries.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub app_env: String,
    pub api_addr: String,
    pub sched_addr: String,
    pub postgres_dsn: String,
    pub redis_addr: String,
    pub redis_password: Option<String>,
    pub jwt_signing_key: String,
    pub default_visibility_timeout_sec: i64,
}

impl ServerConfig {
    /// Load from the process environment, applying the same defaults as
    /// the original `envDefault` tags and failing hard on a missing
    /// required variable.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(ServerConfig {
            app_env: env_or("APP_ENV", "local"),
            api_addr: env_or("API_ADDR", ":8080"),
            sched_addr: env_or("SCHED_ADDR", ":8081"),
            postgres_dsn: require_env("POSTGRES_DSN")?,
            redis_addr: require_env("REDIS_ADDR")?,
            redis_password: env::var("REDIS_PASSWORD").ok(),
            jwt_signing_key: env_or("JWT_SIGNING_KEY", "dev-signing-key"),
            default_visibility_timeout_sec: env::var("DEFAULT_VISIBILITY_TIMEOUT_SEC")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        })
    }

    /// Builds a `redis://[:<password>@]<addr>` URL from `redis_addr` and
    /// `redis_password`, for handing straight to `redis::Client::open`.
    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{password}@{}", self.redis_addr)
            }
            _ => format!("redis://{}", self.redis_addr),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn require_env(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("missing required environment variable {key}"))
}
