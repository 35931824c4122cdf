//! Runtime configuration loaded from the environment.

use std::time::Duration;

use thiserror::Error;

use crate::domain::PaymentFlow;
use crate::engine::FlowPolicy;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set in {1} environment")]
    MissingSecret(String, String),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port for the storefront and webhook endpoint
    pub http_port: u16,
    /// Environment: development | staging | production
    pub environment: String,
    /// HMAC secret shared with the payment provider
    pub webhook_secret: String,
    /// Base URL of the hosted payment page
    pub payment_base_url: String,
    pub catalog_cache_ttl: Duration,
    pub invoice_ttl: chrono::Duration,
    /// How often unpaid orders with lapsed invoices are expired
    pub expiry_sweep_interval: Duration,
    /// Mailbox capacity of every service
    pub mailbox_size: usize,
    pub flows: FlowPolicy,
}

impl Config {
    /// Secrets must be set and non-empty outside development.
    fn require_secret(name: &str, environment: &str) -> Result<String, ConfigError> {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ if environment != "development" => {
                Err(ConfigError::MissingSecret(name.to_string(), environment.to_string()))
            }
            _ => Ok(format!("dev-{name}-not-for-production")),
        }
    }

    fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
        match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value,
            }),
            _ => Ok(default),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());
        let defaults = FlowPolicy::default();

        Ok(Self {
            http_port: Self::parse_or("HTTP_PORT", 8080)?,
            webhook_secret: Self::require_secret("PAYMENT_WEBHOOK_SECRET", &environment)?,
            payment_base_url: std::env::var("PAYMENT_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            catalog_cache_ttl: Duration::from_secs(Self::parse_or("CATALOG_CACHE_TTL_SECS", 60)?),
            invoice_ttl: chrono::Duration::minutes(Self::parse_or("INVOICE_TTL_MINUTES", 15)?),
            expiry_sweep_interval: Duration::from_secs(Self::parse_or::<u64>("EXPIRY_SWEEP_SECS", 60)?.max(1)),
            mailbox_size: Self::parse_or::<usize>("MAILBOX_SIZE", 100)?.max(1),
            flows: FlowPolicy {
                chat: Self::parse_or::<PaymentFlow>("CHAT_PAYMENT_FLOW", defaults.chat)?,
                web: Self::parse_or::<PaymentFlow>("WEB_PAYMENT_FLOW", defaults.web)?,
            },
            environment,
        })
    }

    /// In-process configuration for tests and embedding.
    pub fn for_tests(webhook_secret: &str) -> Self {
        Self {
            http_port: 0,
            environment: "development".into(),
            webhook_secret: webhook_secret.to_string(),
            payment_base_url: "https://pay.test".into(),
            catalog_cache_ttl: Duration::from_secs(60),
            invoice_ttl: chrono::Duration::minutes(15),
            expiry_sweep_interval: Duration::from_secs(60),
            mailbox_size: 64,
            flows: FlowPolicy::default(),
        }
    }
}
