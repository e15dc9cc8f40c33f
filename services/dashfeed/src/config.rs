//! Environment-driven service configuration
//!
//! Startup reads the process environment once into a typed `Config` and
//! validates it before anything binds or connects. Invalid configuration is
//! a startup failure, never a runtime surprise.

use std::fmt::Display;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

/// Runtime configuration, sourced from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base port: the request endpoint listens here, the streaming endpoint
    /// on `port + 1`.
    pub port: u16,
    /// MongoDB connection string.
    pub mongodb_uri: String,
    /// Shared HS256 signing secret for bearer credentials.
    pub jwt_secret: String,
    /// Origins allowed by CORS; empty means no cross-origin access.
    pub allowed_origins: Vec<String>,
    /// TTL for raw event documents, in days.
    pub raw_events_ttl_days: u32,
    /// Maximum accepted inbound streaming frame size, in bytes.
    pub max_msg_bytes: usize,
    /// Per-subscriber outstanding-bytes cutoff for broadcasts.
    pub max_queue_bytes: usize,
    /// Per-source request budget for the one-second token bucket.
    pub rate_limit_per_sec: u32,
}

impl Config {
    /// Read and validate configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let cfg = Self {
            port: env_parse("PORT", 4000)?,
            mongodb_uri: env_or("MONGODB_URI", "mongodb://127.0.0.1:27017"),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_default(),
            allowed_origins: split_origins(&env_or("ALLOWED_ORIGINS", "")),
            raw_events_ttl_days: env_parse("RAW_EVENTS_TTL_DAYS", 7)?,
            max_msg_bytes: env_parse("MAX_MSG_BYTES", 32_768)?,
            max_queue_bytes: env_parse("MAX_QUEUE_BYTES", 1_048_576)?,
            rate_limit_per_sec: env_parse("RATE_LIMIT_PER_SEC", 50)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Port the streaming endpoint listens on.
    pub fn stream_port(&self) -> u16 {
        self.port + 1
    }

    /// Check required fields and value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.is_empty() {
            bail!("JWT_SECRET is required");
        }
        if self.port == 0 || self.port == u16::MAX {
            bail!("PORT must leave room for the streaming listener on PORT+1");
        }
        if self.mongodb_uri.is_empty() {
            bail!("MONGODB_URI must not be empty");
        }
        if self.raw_events_ttl_days == 0 {
            bail!("RAW_EVENTS_TTL_DAYS must be positive");
        }
        if self.max_msg_bytes == 0 {
            bail!("MAX_MSG_BYTES must be positive");
        }
        if self.max_queue_bytes == 0 {
            bail!("MAX_QUEUE_BYTES must be positive");
        }
        if self.rate_limit_per_sec == 0 {
            bail!("RATE_LIMIT_PER_SEC must be positive");
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("parsing {key}={raw}")),
        Err(_) => Ok(default),
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
