//! Auth service configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! The hosted auth service needs exactly two values to be reachable: its base
//! URL and the public (anon) API key. Both are required and validated before
//! any network capability is built; a missing or malformed value is fatal at
//! startup.

use url::Url;

pub const SERVICE_URL_VAR: &str = "SERVICE_URL";
pub const SERVICE_ANON_KEY_VAR: &str = "SERVICE_ANON_KEY";
pub const DEFAULT_AUTH_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_AUTH_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Errors raised while loading [`AuthConfig`]. Always fatal.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is unset or blank.
    #[error("missing required configuration: env var {var} not set")]
    Missing { var: &'static str },

    /// A variable is set but cannot be parsed.
    #[error("invalid configuration for {var}: {reason}")]
    InvalidUrl { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for AuthTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_AUTH_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_AUTH_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Base URL of the hosted service, without a trailing slash.
    pub service_url: Url,
    /// Public API key sent as the `apikey` header.
    pub anon_key: String,
    /// Keep the signed-in session in the client between calls.
    pub persist_session: bool,
    /// Accept sessions handed over through auth callback URLs.
    pub detect_session_in_url: bool,
    pub timeouts: AuthTimeouts,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("service_url", &self.service_url.as_str())
            .field("anon_key", &"<redacted>")
            .field("persist_session", &self.persist_session)
            .field("detect_session_in_url", &self.detect_session_in_url)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl AuthConfig {
    /// Build typed auth config from environment variables.
    ///
    /// Required:
    /// - `SERVICE_URL`: base URL of the auth service
    /// - `SERVICE_ANON_KEY`: public API key
    ///
    /// Optional:
    /// - `AUTH_REQUEST_TIMEOUT_SECS`: default 30
    /// - `AUTH_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required value is absent or the URL does
    /// not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_url = required_var(SERVICE_URL_VAR)?;
        let anon_key = required_var(SERVICE_ANON_KEY_VAR)?;

        let timeouts = AuthTimeouts {
            request_secs: env_parse("AUTH_REQUEST_TIMEOUT_SECS", DEFAULT_AUTH_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse("AUTH_CONNECT_TIMEOUT_SECS", DEFAULT_AUTH_CONNECT_TIMEOUT_SECS),
        };

        let config = Self::new(&raw_url, anon_key)?.with_timeouts(timeouts);
        tracing::debug!(
            url = %config.service_url,
            key_present = !config.anon_key.is_empty(),
            "auth client configuration loaded"
        );
        Ok(config)
    }

    /// Build a config from explicit values with both session flags enabled.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either value is blank or the URL is invalid.
    pub fn new(service_url: &str, anon_key: impl Into<String>) -> Result<Self, ConfigError> {
        let anon_key = anon_key.into();
        if anon_key.trim().is_empty() {
            return Err(ConfigError::Missing { var: SERVICE_ANON_KEY_VAR });
        }
        Ok(Self {
            service_url: parse_service_url(service_url)?,
            anon_key,
            persist_session: true,
            detect_session_in_url: true,
            timeouts: AuthTimeouts::default(),
        })
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: AuthTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Join an `/auth/v1/...` path onto the service URL.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.service_url.as_str().trim_end_matches('/'))
    }
}

fn required_var(var: &'static str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::Missing { var }),
    }
}

fn parse_service_url(raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::Missing { var: SERVICE_URL_VAR });
    }
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl { var: SERVICE_URL_VAR, reason: e.to_string() })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidUrl { var: SERVICE_URL_VAR, reason: format!("unsupported scheme '{other}'") }),
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
