#![forbid(unsafe_code)]

// Harness configuration, loaded from environment variables once at startup

use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const DEFAULT_SERVER_URL: &str = "ws://localhost:3000";
const DEFAULT_SERVER_PATH: &str = "/ws";
const DEFAULT_LOG_FILE: &str = "load_test.log";

/// Validated load test configuration
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Server base URL (ws, wss, http or https)
    pub server_url: String,
    /// Path joined onto `server_url` for the WebSocket endpoint
    pub server_path: String,
    pub max_clients: usize,
    pub max_messages_per_client: u64,
    /// Upper bound on sends issued in a single round
    pub max_concurrent_messages: usize,
    /// Message kinds, picked uniformly at random per send
    pub message_types: Vec<String>,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub log_file: PathBuf,
    /// Fixed seed for reproducible selection and delays
    pub rng_seed: Option<u64>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            server_path: DEFAULT_SERVER_PATH.to_string(),
            max_clients: 100,
            max_messages_per_client: 10,
            max_concurrent_messages: 10,
            message_types: vec!["text".to_string(), "image".to_string()],
            min_delay_ms: 100,
            max_delay_ms: 1000,
            connect_timeout_ms: 5000,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            rng_seed: None,
        }
    }
}

impl HarnessConfig {
    /// Load from environment variables, falling back to defaults for unset keys.
    ///
    /// # Errors
    /// Returns an error if a variable is set but malformed, or if the resulting
    /// configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. `from_env` delegates here.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let message_types = match lookup("MESSAGE_TYPES") {
            Some(raw) => serde_json::from_str::<Vec<String>>(&raw).map_err(|e| {
                ConfigError::InvalidValue {
                    key: "MESSAGE_TYPES",
                    reason: format!("expected a JSON list of strings: {e}"),
                }
            })?,
            None => defaults.message_types,
        };

        let config = Self {
            server_url: lookup("SERVER_URL").unwrap_or(defaults.server_url),
            server_path: lookup("SERVER_PATH").unwrap_or(defaults.server_path),
            max_clients: parse_var(&lookup, "MAX_CLIENTS")?.unwrap_or(defaults.max_clients),
            max_messages_per_client: parse_var(&lookup, "MAX_MESSAGES_PER_CLIENT")?
                .unwrap_or(defaults.max_messages_per_client),
            max_concurrent_messages: parse_var(&lookup, "MAX_CONCURRENT_MESSAGES")?
                .unwrap_or(defaults.max_concurrent_messages),
            message_types,
            min_delay_ms: parse_var(&lookup, "MIN_DELAY_MS")?.unwrap_or(defaults.min_delay_ms),
            max_delay_ms: parse_var(&lookup, "MAX_DELAY_MS")?.unwrap_or(defaults.max_delay_ms),
            connect_timeout_ms: parse_var(&lookup, "CONNECT_TIMEOUT_MS")?
                .unwrap_or(defaults.connect_timeout_ms),
            log_file: lookup("LOG_FILE").map(PathBuf::from).unwrap_or(defaults.log_file),
            rng_seed: parse_var(&lookup, "RNG_SEED")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks invariants the controller relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients == 0 {
            return Err(ConfigError::Zero("MAX_CLIENTS"));
        }
        if self.max_concurrent_messages == 0 {
            return Err(ConfigError::Zero("MAX_CONCURRENT_MESSAGES"));
        }
        if self.message_types.is_empty() || self.message_types.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::NoMessageTypes);
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ConfigError::DelayRange {
                min: self.min_delay_ms,
                max: self.max_delay_ms,
            });
        }
        self.endpoint()?;
        Ok(())
    }

    /// Full WebSocket endpoint: `server_url` with `server_path` applied and an
    /// http scheme mapped to ws. TLS schemes are rejected.
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.server_url)
            .map_err(|e| ConfigError::ServerUrl(format!("{}: {e}", self.server_url)))?;

        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            tls @ ("wss" | "https") => {
                return Err(ConfigError::ServerUrl(format!(
                    "scheme '{tls}' needs TLS, which this build does not include"
                )));
            }
            other => {
                return Err(ConfigError::ServerUrl(format!("unsupported scheme '{other}'")));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::ServerUrl(format!("cannot use scheme '{scheme}'")))?;

        let base = url.path().trim_end_matches('/').to_string();
        let path = self.server_path.trim_start_matches('/');
        if path.is_empty() {
            url.set_path(if base.is_empty() { "/" } else { &base });
        } else {
            url.set_path(&format!("{base}/{path}"));
        }
        Ok(url)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key,
                reason: format!("'{raw}': {e}"),
            }),
        None => Ok(None),
    }
}
