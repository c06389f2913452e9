//! Application configuration loaded from environment variables.

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use workflow::StripeConfig;
use workflow::gateway::webhook::DEFAULT_TOLERANCE;

/// Configuration combinations the server refuses to start with.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Only one of the two gateway secrets is set.
    #[error("STRIPE_SECRET and STRIPE_HOOK_SECRET must be set together")]
    PartialGateway,

    /// A database is configured but webhooks would be verified with the public test secret.
    #[error("DATABASE_URL requires STRIPE_SECRET and STRIPE_HOOK_SECRET")]
    TestGatewayWithDatabase,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables (after loading `.env` when present):
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL URL; the in-memory store is used when unset
/// - `STRIPE_SECRET`: gateway secret key; the in-memory gateway is used when unset
/// - `STRIPE_HOOK_SECRET`: webhook signing secret
/// - `SUCCESS_URL`, `CANCEL_URL`: checkout redirect targets
/// - `CURRENCY`: ISO currency code (default: `"egp"`)
/// - `WEBHOOK_TOLERANCE_SECS`: accepted signature age (default: `300`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub stripe_secret: Option<SecretString>,
    pub stripe_hook_secret: Option<SecretString>,
    pub success_url: String,
    pub cancel_url: String,
    pub currency: String,
    pub webhook_tolerance: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        // Missing .env is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: non_empty("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: non_empty("DATABASE_URL"),
            stripe_secret: non_empty("STRIPE_SECRET").map(SecretString::from),
            stripe_hook_secret: non_empty("STRIPE_HOOK_SECRET").map(SecretString::from),
            success_url: non_empty("SUCCESS_URL").unwrap_or(defaults.success_url),
            cancel_url: non_empty("CANCEL_URL").unwrap_or(defaults.cancel_url),
            currency: non_empty("CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or(defaults.currency),
            webhook_tolerance: non_empty("WEBHOOK_TOLERANCE_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.webhook_tolerance),
        }
    }

    /// Rejects gateway settings that would leave webhooks forgeable.
    ///
    /// Both gateway secrets must be set together, and a persistent store
    /// requires the real gateway.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.stripe_secret, &self.stripe_hook_secret) {
            (Some(_), Some(_)) => Ok(()),
            (Some(_), None) | (None, Some(_)) => Err(ConfigError::PartialGateway),
            (None, None) if self.database_url.is_some() => {
                Err(ConfigError::TestGatewayWithDatabase)
            }
            (None, None) => Ok(()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Gateway settings, when a secret key is configured.
    ///
    /// Returns None without a secret key or without a webhook secret.
    pub fn stripe_config(&self) -> Option<StripeConfig> {
        let secret = self.stripe_secret.clone()?;
        let hook_secret = self.stripe_hook_secret.clone()?;
        let mut config = StripeConfig::new(secret, hook_secret);
        config.currency = self.currency.clone();
        config.success_url = self.success_url.clone();
        config.cancel_url = self.cancel_url.clone();
        config.webhook_tolerance = self.webhook_tolerance;
        Some(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            stripe_secret: None,
            stripe_hook_secret: None,
            success_url: "http://localhost:3000/checkout/success".to_string(),
            cancel_url: "http://localhost:3000/checkout/cancel".to_string(),
            currency: "egp".to_string(),
            webhook_tolerance: DEFAULT_TOLERANCE,
        }
    }
}
