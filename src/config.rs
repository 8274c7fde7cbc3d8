//! Environment configuration (`.env` + process environment).

use std::time::Duration;

use crate::data::Credentials;
use crate::error::ConfigError;

pub const DEFAULT_FAEN_USERNAME: &str = "datacellar.developer";
pub const DEFAULT_CDE_API_URL: &str = "http://localhost:5000";
const DEFAULT_SAMPLE_RECORDS_DISPLAY: usize = 2;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct SourceConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl SourceConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub base_url: String,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    /// CSV batch size for datapoint upload; 0 sends one request per datapoint.
    pub batch_size: usize,
    /// Raw records echoed to the log after each fetch.
    pub sample_records_display: usize,
    pub http_timeout: Duration,
}

impl Config {
    /// Read `.env` (when present), then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// The sink half only; enough for `health`.
    pub fn sink_from_env() -> Result<SinkConfig, ConfigError> {
        dotenvy::dotenv().ok();
        Self::sink_from_lookup(|key| std::env::var(key).ok())
    }

    pub fn sink_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<SinkConfig, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        sink_config(&get)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let base_url = get("FAEN_API_URL").ok_or(ConfigError::Missing("FAEN_API_URL"))?;
        let password = get("FAEN_PASSWORD").ok_or(ConfigError::Missing("FAEN_PASSWORD"))?;

        Ok(Self {
            source: SourceConfig {
                base_url: normalize_base_url(&base_url),
                username: get("FAEN_USERNAME").unwrap_or_else(|| DEFAULT_FAEN_USERNAME.to_string()),
                password,
            },
            sink: sink_config(&get)?,
            batch_size: parse_var("DEFAULT_BATCH_SIZE", get("DEFAULT_BATCH_SIZE"), 0)?,
            sample_records_display: parse_var(
                "SAMPLE_RECORDS_DISPLAY",
                get("SAMPLE_RECORDS_DISPLAY"),
                DEFAULT_SAMPLE_RECORDS_DISPLAY,
            )?,
            http_timeout: http_timeout(&get)?,
        })
    }
}

fn sink_config(get: &dyn Fn(&str) -> Option<String>) -> Result<SinkConfig, ConfigError> {
    Ok(SinkConfig {
        base_url: get("CDE_API_URL")
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_CDE_API_URL.to_string()),
        http_timeout: http_timeout(get)?,
    })
}

/// `HTTP_TIMEOUT_SECS`, shared by both clients.
fn http_timeout(get: &dyn Fn(&str) -> Option<String>) -> Result<Duration, ConfigError> {
    parse_var("HTTP_TIMEOUT_SECS", get("HTTP_TIMEOUT_SECS"), DEFAULT_HTTP_TIMEOUT_SECS).map(Duration::from_secs)
}

/// Strip a trailing `/docs` (the interactive API page) and slashes.
pub fn normalize_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    url.strip_suffix("/docs").unwrap_or(url).trim_end_matches('/').to_string()
}

fn parse_var<T: std::str::FromStr>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}
