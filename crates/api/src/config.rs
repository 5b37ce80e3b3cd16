//! Application configuration loaded from environment variables.

use std::time::Duration;

use common::Money;
use fulfillment::EngineConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `json` for JSON logs, anything else for human-readable
/// - `DATABASE_URL` — PostgreSQL connection string; in-memory storage when unset
/// - `DATABASE_MAX_CONNECTIONS` — pool size (default: `10`)
/// - `GATEWAY_TIMEOUT_MS`, `NOTIFY_TIMEOUT_MS`, `ORDER_NUMBER_ATTEMPTS`,
///   `CURRENCY`, `TAX_RATE_BPS`, `SHIPPING_FEE_CENTS`,
///   `FREE_SHIPPING_THRESHOLD_CENTS` — engine settings
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub engine: EngineConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparseable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<i64>().ok());
        let defaults = Self::default();
        let mut engine = defaults.engine;

        if let Some(ms) = parsed("GATEWAY_TIMEOUT_MS").and_then(|v| u64::try_from(v).ok()) {
            engine.gateway_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed("NOTIFY_TIMEOUT_MS").and_then(|v| u64::try_from(v).ok()) {
            engine.notification_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = parsed("ORDER_NUMBER_ATTEMPTS").and_then(|v| u32::try_from(v).ok())
        {
            engine.order_number_attempts = attempts;
        }
        if let Some(currency) = lookup("CURRENCY").filter(|c| !c.trim().is_empty()) {
            engine.currency = currency.trim().to_uppercase();
        }
        if let Some(bps) = parsed("TAX_RATE_BPS").and_then(|v| u32::try_from(v).ok()) {
            engine.pricing.tax_rate_bps = bps;
        }
        if let Some(cents) = parsed("SHIPPING_FEE_CENTS").filter(|c| *c >= 0) {
            engine.pricing.shipping_fee = Money::from_cents(cents);
        }
        if let Some(cents) = parsed("FREE_SHIPPING_THRESHOLD_CENTS").filter(|c| *c >= 0) {
            engine.pricing.free_shipping_threshold = Some(Money::from_cents(cents));
        }

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.max_connections),
            engine,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            max_connections: 10,
            engine: EngineConfig::default(),
        }
    }
}
