//! Poller and client configuration.
//!
//! Every option has a built-in default and an environment override. Env values
//! that fail to parse fall back to the default; values that parse but break the
//! delay invariants are rejected.

use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5000);
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_READINESS_PATH: &str = "api/model_present";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff settings for the availability poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    initial_delay: Duration,
    max_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl PollConfig {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Result<Self, ConfigError> {
        if initial_delay.is_zero() {
            return Err(ConfigError::ZeroInitialDelay);
        }
        if max_delay < initial_delay {
            return Err(ConfigError::MaxBelowInitial {
                initial: initial_delay,
                max: max_delay,
            });
        }
        Ok(Self {
            initial_delay,
            max_delay,
        })
    }

    /// Read `TAGWATCH_POLL_INITIAL_DELAY_MS` / `TAGWATCH_POLL_MAX_DELAY_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(None, None)
    }

    /// Like [`PollConfig::from_env`], but explicit values win over the
    /// environment. The merged pair is validated once.
    pub fn from_env_with(
        initial_delay: Option<Duration>,
        max_delay: Option<Duration>,
    ) -> Result<Self, ConfigError> {
        Self::from_lookup_with(initial_delay, max_delay, |key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Self::from_lookup_with(None, None, lookup)
    }

    pub(crate) fn from_lookup_with(
        initial_delay: Option<Duration>,
        max_delay: Option<Duration>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        Self::new(
            initial_delay
                .unwrap_or_else(|| millis("TAGWATCH_POLL_INITIAL_DELAY_MS", DEFAULT_INITIAL_DELAY)),
            max_delay.unwrap_or_else(|| millis("TAGWATCH_POLL_MAX_DELAY_MS", DEFAULT_MAX_DELAY)),
        )
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

/// Connection settings for the inference API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    /// Path of the readiness endpoint, relative to `base_url`.
    pub readiness_path: String,
    /// Per-request timeout, also bounds every readiness probe.
    pub timeout: Duration,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub auth_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            readiness_path: DEFAULT_READINESS_PATH.to_string(),
            timeout: DEFAULT_TIMEOUT,
            auth_token: None,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Read `TAGWATCH_URL`, `TAGWATCH_READINESS_PATH`, `TAGWATCH_TIMEOUT_SECS`
    /// and `TAGWATCH_AUTH_TOKEN`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            base_url: lookup("TAGWATCH_URL")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.base_url),
            readiness_path: lookup("TAGWATCH_READINESS_PATH")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.readiness_path),
            timeout: lookup("TAGWATCH_TIMEOUT_SECS")
                .and_then(|s| s.trim().parse::<f64>().ok())
                .filter(|secs| *secs > 0.0)
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .unwrap_or(defaults.timeout),
            auth_token: lookup("TAGWATCH_AUTH_TOKEN").filter(|s| !s.is_empty()),
        }
    }

    pub fn with_readiness_path(mut self, path: impl Into<String>) -> Self {
        self.readiness_path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}
