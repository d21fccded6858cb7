//! Realtime client configuration parsed from environment variables.

use std::time::Duration;

use url::Url;

use crate::backoff::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, ReconnectPolicy};

pub const DEFAULT_BASE_URL: &str = "ws://127.0.0.1:8000";
pub const DEFAULT_ERROR_CLEAR_SECS: u64 = 5;
pub const DEFAULT_DAILY_TOKEN_LIMIT: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base URL `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("base URL must use ws:// or wss://, got `{0}`")]
    UnsupportedScheme(String),
    #[error("invalid value for {var}: `{value}`")]
    InvalidNumber { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    pub base_url: Url,
    pub reconnect: ReconnectPolicy,
    /// How long a transient error stays visible.
    pub error_clear_after: Duration,
    /// Token budget shown until the server sends its first update.
    pub daily_token_limit: u64,
}

impl RealtimeConfig {
    /// Config for `base_url` with every other setting at its default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unparseable or non-websocket URLs.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            reconnect: ReconnectPolicy::default(),
            error_clear_after: Duration::from_secs(DEFAULT_ERROR_CLEAR_SECS),
            daily_token_limit: DEFAULT_DAILY_TOKEN_LIMIT,
        })
    }

    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `SPICE_WS_URL`: default `ws://127.0.0.1:8000`
    /// - `SPICE_RECONNECT_BASE_MS`: default 1000
    /// - `SPICE_RECONNECT_MAX_ATTEMPTS`: default 5
    /// - `SPICE_RECONNECT_JITTER_MS`: default 0
    /// - `SPICE_ERROR_CLEAR_SECS`: default 5
    /// - `SPICE_DAILY_TOKEN_LIMIT`: default 100
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is set but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RealtimeConfig::from_env`] with an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is set but unparseable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = parse_base_url(&lookup("SPICE_WS_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()))?;

        let reconnect = ReconnectPolicy {
            base_delay: Duration::from_millis(parse_var(&lookup, "SPICE_RECONNECT_BASE_MS", DEFAULT_BASE_DELAY_MS)?),
            max_attempts: parse_var(&lookup, "SPICE_RECONNECT_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            jitter: Duration::from_millis(parse_var(&lookup, "SPICE_RECONNECT_JITTER_MS", 0)?),
        };

        Ok(Self {
            base_url,
            reconnect,
            error_clear_after: Duration::from_secs(parse_var(&lookup, "SPICE_ERROR_CLEAR_SECS", DEFAULT_ERROR_CLEAR_SECS)?),
            daily_token_limit: parse_var(&lookup, "SPICE_DAILY_TOKEN_LIMIT", DEFAULT_DAILY_TOKEN_LIMIT)?,
        })
    }

    /// Replace the base URL, validating its scheme.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unparseable or non-websocket URLs.
    pub fn with_base_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.base_url = parse_base_url(raw)?;
        Ok(self)
    }

    /// Conversation endpoint: `{base}/ws/chat/{conversation_id}?token={token}`.
    #[must_use]
    pub fn endpoint(&self, conversation_id: &str, token: &str) -> Url {
        let mut url = self.base_url.clone();
        // Websocket URLs always have a hierarchical path, so this cannot fail.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["ws", "chat", conversation_id]);
        }
        url.query_pairs_mut().clear().append_pair("token", token);
        url
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl { url: raw.to_owned(), source })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme(other.to_owned())),
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|_| ConfigError::InvalidNumber { var, value })
        }
        None => Ok(default),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
