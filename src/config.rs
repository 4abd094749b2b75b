use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub access_token_ttl: usize,
    pub log_dir: String,

    // Rate limiting
    pub rate_login_per_min: u32,
    pub rate_protected_per_min: u32,

    pub api_prefix: String,

    pub prp: PrpConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            access_token_ttl: parsed_or("ACCESS_TOKEN_TTL", 900)?, // default 15 min
            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),

            rate_login_per_min: parsed_or("RATE_LOGIN_PER_MIN", 60)?,
            rate_protected_per_min: parsed_or("RATE_PROTECTED_PER_MIN", 1000)?,

            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),

            prp: PrpConfig::from_env()?,
        })
    }
}

/// Settings for the Parliament Resource Portal integration.
#[derive(Debug, Clone)]
pub struct PrpConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub verify_ssl: bool,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// The portal never reports token expiry, so this is an estimate.
    pub token_ttl: Duration,
    pub department_cache_ttl: Duration,
    /// Records synced more recently than this are skipped unless forced.
    pub resync_interval: Duration,
    pub default_password: String,
    pub phone_country_code: String,
    pub photo_max_dimension: u32,
    pub photo_max_bytes: usize,
}

impl PrpConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://prp.parliament.gov.bd";

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let base_url =
            env::var("PRP_BASE_URL").unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string());
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: "PRP_BASE_URL",
                value: base_url,
            });
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: required("PRP_USERNAME")?,
            password: required("PRP_PASSWORD")?,
            timeout: Duration::from_secs(parsed_or("PRP_TIMEOUT_SECS", 30)?),
            verify_ssl: parsed_or("PRP_VERIFY_SSL", true)?,
            max_retries: parsed_or("PRP_MAX_RETRIES", 3)?,
            retry_backoff: Duration::from_millis(parsed_or("PRP_RETRY_BACKOFF_MS", 500)?),
            token_ttl: Duration::from_secs(parsed_or("PRP_TOKEN_TTL_SECS", 86_400)?),
            department_cache_ttl: Duration::from_secs(parsed_or(
                "PRP_DEPARTMENT_CACHE_TTL_SECS",
                3_600,
            )?),
            resync_interval: Duration::from_secs(parsed_or("PRP_RESYNC_INTERVAL_SECS", 3_600)?),
            default_password: required("PRP_DEFAULT_PASSWORD")?,
            phone_country_code: env::var("PRP_PHONE_COUNTRY_CODE")
                .unwrap_or_else(|_| "880".to_string()),
            photo_max_dimension: parsed_or("PRP_PHOTO_MAX_DIMENSION", 300)?,
            photo_max_bytes: parsed_or("PRP_PHOTO_MAX_BYTES", 100 * 1024)?,
        })
    }

    /// Configuration pointing at `base_url` with development defaults.
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: "pims".to_string(),
            password: "pims".to_string(),
            timeout: Duration::from_secs(30),
            verify_ssl: true,
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            token_ttl: Duration::from_secs(86_400),
            department_cache_ttl: Duration::from_secs(3_600),
            resync_interval: Duration::from_secs(3_600),
            default_password: "changeme".to_string(),
            phone_country_code: "880".to_string(),
            photo_max_dimension: 300,
            photo_max_bytes: 100 * 1024,
        }
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn parsed_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}
