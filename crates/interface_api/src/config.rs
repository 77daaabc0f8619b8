//! API configuration
//!
//! Settings come from `APP_`-prefixed environment variables (a `.env` file
//! is loaded first by the binary). Loading never fails on a missing value;
//! `AppConfig::validate` reports every missing or invalid setting at once
//! and produces the typed `Settings` the server runs with.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use core_kernel::Currency;
use domain_billing::WebhookVerifier;
use domain_booking::{BillingAddress, OrchestratorConfig, DEFAULT_KEY_TTL_HOURS};
use infra_gateway::{GatewayConfig, GatewayEnvironment};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration could not be read: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Raw configuration as read from the environment
#[derive(Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// `test` or `live`
    pub environment: Option<String>,
    pub gateway_api_key: Option<String>,
    pub gateway_base_url: Option<String>,
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    pub webhook_secret: Option<String>,
    pub inventory_url: Option<String>,

    /// Bound on each inventory and gateway call
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_key_ttl_hours")]
    pub key_ttl_hours: i64,
    #[serde(default = "default_return_url")]
    pub return_url: String,
    #[serde(default = "default_billing_currency")]
    pub billing_currency: String,

    /// Default billing address; either all parts or none
    pub billing_street: Option<String>,
    pub billing_city: Option<String>,
    pub billing_state: Option<String>,
    pub billing_country: Option<String>,
    pub billing_zipcode: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_deadline_ms() -> u64 {
    10_000
}

fn default_key_ttl_hours() -> i64 {
    DEFAULT_KEY_TTL_HOURS
}

fn default_return_url() -> String {
    OrchestratorConfig::default().return_url
}

fn default_billing_currency() -> String {
    "INR".to_string()
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("environment", &self.environment)
            .field("gateway_base_url", &self.gateway_base_url)
            .field("inventory_url", &self.inventory_url)
            .field("deadline_ms", &self.deadline_ms)
            .finish_non_exhaustive()
    }
}

/// Validated settings the server runs with
#[derive(Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub gateway: GatewayConfig,
    pub database_url: String,
    pub database_max_connections: u32,
    pub webhook_secret: String,
    pub inventory_url: String,
    pub deadline: Duration,
    pub key_ttl: chrono::Duration,
    pub orchestrator: OrchestratorConfig,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("addr", &self.server_addr())
            .field("log_format", &self.log_format)
            .field("gateway", &self.gateway)
            .field("inventory_url", &self.inventory_url)
            .field("deadline", &self.deadline)
            .field("key_ttl", &self.key_ttl)
            .finish_non_exhaustive()
    }
}

impl Settings {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn currency(&self) -> Currency {
        self.orchestrator.currency
    }
}

impl AppConfig {
    /// Reads `APP_*` variables from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(Self::environment())
    }

    /// Reads from an explicit environment source
    pub fn from_source(source: config::Environment) -> Result<Self, ConfigError> {
        let config = config::Config::builder().add_source(source).build()?;
        Ok(config.try_deserialize()?)
    }

    /// `APP_GATEWAY_API_KEY` maps to `gateway_api_key`
    pub fn environment() -> config::Environment {
        config::Environment::with_prefix("APP")
            .prefix_separator("_")
            .separator("__")
    }

    /// Checks every setting and reports all problems together
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let mut problems = Vec::new();

        let environment = match required(&self.environment, "APP_ENVIRONMENT", &mut problems) {
            Some(raw) => match raw.parse::<GatewayEnvironment>() {
                Ok(env) => Some(env),
                Err(e) => {
                    problems.push(format!("APP_ENVIRONMENT: {}", e));
                    None
                }
            },
            None => None,
        };
        let api_key = required(&self.gateway_api_key, "APP_GATEWAY_API_KEY", &mut problems);
        let database_url = required(&self.database_url, "APP_DATABASE_URL", &mut problems);
        let inventory_url = required(&self.inventory_url, "APP_INVENTORY_URL", &mut problems);

        let webhook_secret = required(&self.webhook_secret, "APP_WEBHOOK_SECRET", &mut problems);
        if let Some(secret) = webhook_secret {
            if let Err(e) = WebhookVerifier::new(secret) {
                problems.push(format!("APP_WEBHOOK_SECRET: {}", e));
            }
        }

        let log_format = match self.log_format.parse::<LogFormat>() {
            Ok(format) => format,
            Err(e) => {
                problems.push(format!("APP_LOG_FORMAT: {}", e));
                LogFormat::Text
            }
        };

        let currency = match self.billing_currency.parse::<Currency>() {
            Ok(currency) => currency,
            Err(e) => {
                problems.push(format!("APP_BILLING_CURRENCY: {}", e));
                Currency::INR
            }
        };

        if self.deadline_ms == 0 {
            problems.push("APP_DEADLINE_MS: must be greater than zero".to_string());
        }
        if self.key_ttl_hours <= 0 {
            problems.push("APP_KEY_TTL_HOURS: must be greater than zero".to_string());
        }
        if self.return_url.trim().is_empty() {
            problems.push("APP_RETURN_URL: must not be empty".to_string());
        }

        let default_billing = self.default_billing(&mut problems);

        match (environment, api_key, database_url, inventory_url, webhook_secret) {
            (Some(environment), Some(api_key), Some(database_url), Some(inventory_url), Some(webhook_secret))
                if problems.is_empty() =>
            {
                let deadline = Duration::from_millis(self.deadline_ms);
                let mut gateway = GatewayConfig::new(environment, api_key).with_request_timeout(deadline);
                if let Some(base_url) = self.gateway_base_url.as_deref().filter(|u| !u.trim().is_empty()) {
                    gateway = gateway.with_base_url(base_url);
                }

                Ok(Settings {
                    host: self.host.clone(),
                    port: self.port,
                    log_level: self.log_level.clone(),
                    log_format,
                    gateway,
                    database_url: database_url.to_string(),
                    database_max_connections: self.database_max_connections,
                    webhook_secret: webhook_secret.to_string(),
                    inventory_url: inventory_url.to_string(),
                    deadline,
                    key_ttl: chrono::Duration::hours(self.key_ttl_hours),
                    orchestrator: OrchestratorConfig {
                        deadline,
                        currency,
                        return_url: self.return_url.clone(),
                        default_billing,
                    },
                })
            }
            _ => Err(ConfigError::Invalid(problems)),
        }
    }

    fn default_billing(&self, problems: &mut Vec<String>) -> BillingAddress {
        let parts = [
            ("APP_BILLING_STREET", &self.billing_street),
            ("APP_BILLING_CITY", &self.billing_city),
            ("APP_BILLING_STATE", &self.billing_state),
            ("APP_BILLING_COUNTRY", &self.billing_country),
            ("APP_BILLING_ZIPCODE", &self.billing_zipcode),
        ];
        let given = parts.iter().filter(|(_, v)| v.is_some()).count();

        if given == 0 {
            return OrchestratorConfig::default().default_billing;
        }
        if given < parts.len() {
            for (name, value) in parts {
                if value.is_none() {
                    problems.push(format!("{}: required when a default billing address is configured", name));
                }
            }
            return OrchestratorConfig::default().default_billing;
        }

        let part = |value: &Option<String>| value.clone().unwrap_or_default();
        BillingAddress {
            street: part(&self.billing_street),
            city: part(&self.billing_city),
            state: part(&self.billing_state),
            country: part(&self.billing_country).to_ascii_uppercase(),
            zipcode: part(&self.billing_zipcode),
        }
    }
}

fn required<'a>(value: &'a Option<String>, name: &str, problems: &mut Vec<String>) -> Option<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Some(v),
        _ => {
            problems.push(format!("{} is required", name));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";

    fn load(vars: &[(&str, &str)]) -> AppConfig {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_source(AppConfig::environment().source(Some(map))).unwrap()
    }

    fn complete() -> Vec<(&'static str, &'static str)> {
        vec![
            ("APP_ENVIRONMENT", "test"),
            ("APP_GATEWAY_API_KEY", "sk_test_123"),
            ("APP_DATABASE_URL", "postgres://localhost/booking"),
            ("APP_WEBHOOK_SECRET", SECRET),
            ("APP_INVENTORY_URL", "http://inventory:8081"),
        ]
    }

    #[test]
    fn test_complete_config_validates() {
        let mut vars = complete();
        vars.push(("APP_PORT", "9090"));
        vars.push(("APP_DEADLINE_MS", "2500"));
        let settings = load(&vars).validate().unwrap();

        assert_eq!(settings.server_addr(), "0.0.0.0:9090");
        assert_eq!(settings.deadline, Duration::from_millis(2500));
        assert_eq!(settings.gateway.base_url(), infra_gateway::TEST_BASE_URL);
        assert_eq!(settings.currency(), Currency::INR);
        assert_eq!(settings.key_ttl, chrono::Duration::hours(24));
        assert_eq!(settings.orchestrator.default_billing.country, "IN");
    }

    #[test]
    fn test_all_missing_settings_reported_together() {
        let err = load(&[]).validate().unwrap_err();
        let ConfigError::Invalid(problems) = err else {
            panic!("expected Invalid");
        };
        for name in [
            "APP_ENVIRONMENT",
            "APP_GATEWAY_API_KEY",
            "APP_DATABASE_URL",
            "APP_WEBHOOK_SECRET",
            "APP_INVENTORY_URL",
        ] {
            assert!(problems.iter().any(|p| p.contains(name)), "{} not reported", name);
        }
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let mut vars: Vec<(&str, &str)> = complete()
            .into_iter()
            .filter(|(k, _)| *k != "APP_ENVIRONMENT" && *k != "APP_WEBHOOK_SECRET")
            .collect();
        vars.push(("APP_ENVIRONMENT", "staging"));
        vars.push(("APP_WEBHOOK_SECRET", "whsec_!!!"));
        vars.push(("APP_BILLING_CURRENCY", "XYZ"));

        let Err(ConfigError::Invalid(problems)) = load(&vars).validate() else {
            panic!("expected Invalid");
        };
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn test_partial_billing_address_is_rejected() {
        let mut vars = complete();
        vars.push(("APP_BILLING_CITY", "Mumbai"));

        let Err(ConfigError::Invalid(problems)) = load(&vars).validate() else {
            panic!("expected Invalid");
        };
        assert!(problems.iter().any(|p| p.contains("APP_BILLING_STREET")));
        assert!(!problems.iter().any(|p| p.contains("APP_BILLING_CITY")));
    }

    #[test]
    fn test_gateway_override_and_live_environment() {
        let mut vars: Vec<(&str, &str)> = complete().into_iter().filter(|(k, _)| *k != "APP_ENVIRONMENT").collect();
        vars.push(("APP_ENVIRONMENT", "live"));
        vars.push(("APP_GATEWAY_BASE_URL", "http://localhost:9000"));

        let settings = load(&vars).validate().unwrap();
        assert_eq!(settings.gateway.environment, GatewayEnvironment::Live);
        assert_eq!(settings.gateway.base_url(), "http://localhost:9000");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let rendered = format!("{:?}", load(&complete()));
        assert!(!rendered.contains("sk_test_123"));
        assert!(!rendered.contains(SECRET));
    }
}
