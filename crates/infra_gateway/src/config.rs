//! Gateway and inventory client configuration

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use core_kernel::DEFAULT_DEADLINE;

/// Gateway test-mode API
pub const TEST_BASE_URL: &str = "https://test.dodopayments.com";

/// Gateway live-mode API
pub const LIVE_BASE_URL: &str = "https://live.dodopayments.com";

/// Errors raised while building a client
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayConfigError {
    #[error("Unknown gateway environment '{0}', expected 'test' or 'live'")]
    UnknownEnvironment(String),

    #[error("HTTP client could not be built: {0}")]
    Client(String),
}

/// Which gateway account mode to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEnvironment {
    Test,
    Live,
}

impl GatewayEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            GatewayEnvironment::Test => TEST_BASE_URL,
            GatewayEnvironment::Live => LIVE_BASE_URL,
        }
    }
}

impl fmt::Display for GatewayEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayEnvironment::Test => f.write_str("test"),
            GatewayEnvironment::Live => f.write_str("live"),
        }
    }
}

impl FromStr for GatewayEnvironment {
    type Err = GatewayConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(GatewayEnvironment::Test),
            "live" => Ok(GatewayEnvironment::Live),
            other => Err(GatewayConfigError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// Configuration for `GatewayClient`
#[derive(Clone)]
pub struct GatewayConfig {
    pub environment: GatewayEnvironment,
    /// Replaces the environment's base URL (local stubs, proxies)
    pub base_url_override: Option<String>,
    /// Bearer token for the gateway API
    pub api_key: String,
    /// Transport timeout of one HTTP request
    pub request_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(environment: GatewayEnvironment, api_key: impl Into<String>) -> Self {
        Self {
            environment,
            base_url_override: None,
            api_key: api_key.into(),
            request_timeout: DEFAULT_DEADLINE,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url_override = Some(base_url.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Base URL requests are sent to, without a trailing slash
    pub fn base_url(&self) -> String {
        self.base_url_override
            .as_deref()
            .unwrap_or_else(|| self.environment.base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("environment", &self.environment)
            .field("base_url_override", &self.base_url_override)
            .field("api_key", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
