//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

const DEFAULT_VISION_BASE_URL: &str = "https://vision.googleapis.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: String,
    pub classifier_model: String,
    pub bot_model: String,
    pub vision_api_key: String,
    pub vision_base_url: String,
    pub storage_url: String,
    pub storage_service_key: String,
    pub storage_bucket: String,
    pub signed_url_ttl: Duration,
    pub cors_origin: String,
    pub reconnect_interval: Duration,
    pub reconnect_attempts: u32,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()));
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        // --- Server and Database Settings ---
        let bind_address_str = or_default("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = required("DATABASE_URL")?;

        let log_level_str = or_default("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Text Generation ---
        let openai_api_key = required("OPENAI_API_KEY")?;
        let classifier_model = or_default("CLASSIFIER_MODEL", DEFAULT_MODEL);
        let bot_model = or_default("BOT_MODEL", DEFAULT_MODEL);

        // --- Vision ---
        let vision_api_key = required("VISION_API_KEY")?;
        let vision_base_url = or_default("VISION_BASE_URL", DEFAULT_VISION_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        // --- Blob Storage ---
        let storage_url = required("STORAGE_URL")?.trim_end_matches('/').to_string();
        let storage_service_key = required("STORAGE_SERVICE_KEY")?;
        let storage_bucket = or_default("STORAGE_BUCKET", "documents");
        let signed_url_ttl = Duration::from_secs(parse_number(&lookup, "SIGNED_URL_TTL_SECS", 3600)?);

        // --- Web and Startup ---
        let cors_origin = or_default("CORS_ORIGIN", "http://localhost:5173");
        let reconnect_interval =
            Duration::from_secs(parse_number(&lookup, "RECONNECT_INTERVAL_SECS", 5)?);
        let reconnect_attempts = parse_number(&lookup, "RECONNECT_ATTEMPTS", 12)? as u32;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            classifier_model,
            bot_model,
            vision_api_key,
            vision_base_url,
            storage_url,
            storage_service_key,
            storage_bucket,
            signed_url_ttl,
            cors_origin,
            reconnect_interval,
            reconnect_attempts,
        })
    }
}

fn parse_number<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 5] = [
        ("DATABASE_URL", "postgres://localhost/residency"),
        ("OPENAI_API_KEY", "sk-test"),
        ("VISION_API_KEY", "vision-key"),
        ("STORAGE_URL", "https://project.storage.test/"),
        ("STORAGE_SERVICE_KEY", "service-key"),
    ];

    #[test]
    fn defaults_fill_everything_optional() {
        let config = Config::from_lookup(env(&REQUIRED)).unwrap();
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.classifier_model, "gpt-4o-mini");
        assert_eq!(config.storage_bucket, "documents");
        assert_eq!(config.storage_url, "https://project.storage.test");
        assert_eq!(config.signed_url_ttl, Duration::from_secs(3600));
        assert_eq!(config.reconnect_attempts, 12);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn missing_database_url_is_reported_by_name() {
        let err = Config::from_lookup(env(&REQUIRED[1..])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref key) if key == "DATABASE_URL"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("RECONNECT_INTERVAL_SECS", "soon"));
        let err = Config::from_lookup(env(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref key, _) if key == "RECONNECT_INTERVAL_SECS"));
    }
}
