//! Configuration loader for the `piliseed` backend service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). The resulting [`Config`] is built once at startup
//! and handed to the model client, thumbnail client and orchestrator
//! constructors; nothing below `main` reads the environment.
//!
use std::{env, net::SocketAddr, time::Duration};

use anyhow::{anyhow, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        parse_env_opt!($var_name, u32).unwrap_or($default)
    };
}

/// Parse an optional environment variable into `Option<$ty>`.
macro_rules! parse_env_opt {
    ($var_name:expr, $ty:ty) => {
        env::var($var_name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_THUMBNAIL_API_URL: &str = "https://en.wikipedia.org/api/rest_v1/page/summary";

/// `DATABASE_URL` value that selects the in-process document store.
pub const MEMORY_DATABASE_URL: &str = "memory";

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string, or `memory`.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,

    /// Settings for the generative model client.
    pub model: ModelSettings,

    /// Page-summary endpoint used for crop thumbnails.
    pub thumbnail_api_url: String,

    /// Fixed planning month (1-12). `None` means "current month in UTC+8".
    pub start_month: Option<u32>,
}

/// Everything the model invocation client needs, resolved at startup.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    // ---
    /// Pre-shared key. Absence is reported on first invocation, not here.
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string (or `memory`)
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `BIND_ADDR` – listen address (default: `0.0.0.0:8080`)
/// - `GEMINI_API_KEY` – model API key (checked at first invocation)
/// - `GEMINI_MODEL` – model identifier (default: `gemini-2.0-flash-exp`)
/// - `GEMINI_API_BASE` – model endpoint base URL
/// - `HTTP_TIMEOUT_SECS` – outbound request timeout (default: 30)
/// - `MAX_RETRIES` – attempts per model invocation (default: 3)
/// - `RETRY_DELAY_SECS` – base retry delay (default: 2)
/// - `THUMBNAIL_API_URL` – crop image lookup endpoint
/// - `START_MONTH` – planning month override (1-12)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let bind_addr = parse_env_opt!("BIND_ADDR", SocketAddr)
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

    let api_key = env::var("GEMINI_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    let model = env::var("GEMINI_MODEL")
        .ok()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
    let api_base = env::var("GEMINI_API_BASE")
        .ok()
        .map(|b| b.trim().trim_end_matches('/').to_string())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string());
    let timeout_secs = parse_env_u32!("HTTP_TIMEOUT_SECS", 30);
    let max_retries = parse_env_u32!("MAX_RETRIES", 3);
    let retry_delay_secs = parse_env_u32!("RETRY_DELAY_SECS", 2);

    if max_retries == 0 {
        return Err(anyhow!("Invalid MAX_RETRIES: must be at least 1"));
    }

    let thumbnail_api_url = env::var("THUMBNAIL_API_URL")
        .ok()
        .map(|u| u.trim().trim_end_matches('/').to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| DEFAULT_THUMBNAIL_API_URL.to_string());

    let start_month = parse_env_opt!("START_MONTH", u32);
    if let Some(month) = start_month {
        if !(1..=12).contains(&month) {
            return Err(anyhow!("Invalid START_MONTH: {} is not in 1-12", month));
        }
    }

    Ok(Config {
        db_url,
        db_pool_max,
        bind_addr,
        model: ModelSettings {
            api_key,
            model,
            api_base,
            timeout: Duration::from_secs(timeout_secs.into()),
            max_retries,
            retry_delay: Duration::from_secs(retry_delay_secs.into()),
        },
        thumbnail_api_url,
        start_month,
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords and the model API
    /// key while showing all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        let api_key = match &self.model.api_key {
            Some(_) => "****",
            None => "<unset>",
        };
        let start_month = self
            .start_month
            .map(|m| m.to_string())
            .unwrap_or_else(|| "<current>".to_string());

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL      : {}", mask_db_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX       : {}", self.db_pool_max);
        tracing::info!("  BIND_ADDR         : {}", self.bind_addr);
        tracing::info!("  GEMINI_API_KEY    : {}", api_key);
        tracing::info!("  GEMINI_MODEL      : {}", self.model.model);
        tracing::info!("  GEMINI_API_BASE   : {}", self.model.api_base);
        tracing::info!("  HTTP_TIMEOUT_SECS : {}", self.model.timeout.as_secs());
        tracing::info!("  MAX_RETRIES       : {}", self.model.max_retries);
        tracing::info!("  RETRY_DELAY_SECS  : {}", self.model.retry_delay.as_secs());
        tracing::info!("  THUMBNAIL_API_URL : {}", self.thumbnail_api_url);
        tracing::info!("  START_MONTH       : {}", start_month);
    }

    /// True when `DATABASE_URL` selects the in-process store.
    pub fn uses_memory_store(&self) -> bool {
        self.db_url.eq_ignore_ascii_case(MEMORY_DATABASE_URL)
    }
}

/// Mask the password in a database URL.
pub fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            // no password: the only colon before '@' is the scheme separator
            if !db_url[colon_pos..].starts_with("://") {
                return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
            }
        }
    }
    db_url.to_string()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn masks_password_in_db_url() {
        // ---
        let masked = mask_db_url("postgres://farm:secret@db:5432/piliseed");
        assert_eq!(masked, "postgres://farm:****@db:5432/piliseed");
    }

    #[test]
    fn leaves_url_without_password_alone() {
        // ---
        assert_eq!(mask_db_url("postgres://db:5432/piliseed"), "postgres://db:5432/piliseed");
        assert_eq!(mask_db_url("postgres://farm@db/piliseed"), "postgres://farm@db/piliseed");
        assert_eq!(mask_db_url("memory"), "memory");
    }

    #[test]
    fn model_settings_defaults() {
        // ---
        let settings = ModelSettings::default();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.retry_delay, Duration::from_secs(2));
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert!(settings.api_key.is_none());
    }
}
