//! Application configuration loaded from environment variables.

use std::time::Duration;

/// Credentials for one payment provider's HTTP API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub api_url: String,
    pub secret: String,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `DATABASE_URL`: PostgreSQL connection string; the in-memory store is
///   used when unset
/// - `DATABASE_MAX_CONNECTIONS` (default `10`)
/// - `HOLD_TTL_SECS` (default `900`)
/// - `EXPIRY_SWEEP_INTERVAL_SECS` (default `60`), `EXPIRY_BATCH_SIZE` (default `100`)
/// - `PROVIDER_TIMEOUT_SECS` (default `10`)
/// - `INVENTORY_ALERT_THRESHOLD` (default `5`), `INVENTORY_ALERT_COOLDOWN_SECS`
///   (default `14400`), `INVENTORY_ALERT_INTERVAL_SECS` (default `900`)
/// - `WALLET_API_URL` + `WALLET_SECRET`, `CARD_API_URL` + `CARD_SECRET`
/// - `LOG_FORMAT`: `json` for JSON logs, anything else for plain text
///
/// Numbers that do not parse fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub hold_ttl_secs: i64,
    pub expiry_interval_secs: u64,
    pub expiry_batch_size: usize,
    pub provider_timeout_secs: u64,
    pub inventory_alert_threshold: u32,
    pub inventory_alert_cooldown_secs: i64,
    pub inventory_alert_interval_secs: u64,
    pub wallet: Option<ProviderConfig>,
    pub card: Option<ProviderConfig>,
    pub log_json: bool,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn number<T: std::str::FromStr>(name: &str, default: T) -> T {
    var(name).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn provider(url: &str, secret: &str) -> Option<ProviderConfig> {
    Some(ProviderConfig {
        api_url: var(url)?,
        secret: var(secret)?,
    })
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: number("PORT", defaults.port),
            database_url: var("DATABASE_URL"),
            database_max_connections: number(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            hold_ttl_secs: number("HOLD_TTL_SECS", defaults.hold_ttl_secs),
            expiry_interval_secs: number(
                "EXPIRY_SWEEP_INTERVAL_SECS",
                defaults.expiry_interval_secs,
            ),
            expiry_batch_size: number("EXPIRY_BATCH_SIZE", defaults.expiry_batch_size),
            provider_timeout_secs: number("PROVIDER_TIMEOUT_SECS", defaults.provider_timeout_secs),
            inventory_alert_threshold: number(
                "INVENTORY_ALERT_THRESHOLD",
                defaults.inventory_alert_threshold,
            ),
            inventory_alert_cooldown_secs: number(
                "INVENTORY_ALERT_COOLDOWN_SECS",
                defaults.inventory_alert_cooldown_secs,
            ),
            inventory_alert_interval_secs: number(
                "INVENTORY_ALERT_INTERVAL_SECS",
                defaults.inventory_alert_interval_secs,
            ),
            wallet: provider("WALLET_API_URL", "WALLET_SECRET"),
            card: provider("CARD_API_URL", "CARD_SECRET"),
            log_json: var("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn hold_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.hold_ttl_secs.max(1))
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs.max(1))
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.max(1))
    }

    pub fn inventory_alert(&self) -> booking::AlertSettings {
        booking::AlertSettings {
            threshold: self.inventory_alert_threshold,
            cooldown: chrono::Duration::seconds(self.inventory_alert_cooldown_secs.max(0)),
            interval: Duration::from_secs(self.inventory_alert_interval_secs.max(1)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            database_max_connections: 10,
            hold_ttl_secs: booking::DEFAULT_HOLD_TTL_SECS,
            expiry_interval_secs: 60,
            expiry_batch_size: 100,
            provider_timeout_secs: booking::DEFAULT_PROVIDER_TIMEOUT.as_secs(),
            inventory_alert_threshold: booking::DEFAULT_ALERT_THRESHOLD,
            inventory_alert_cooldown_secs: booking::DEFAULT_ALERT_COOLDOWN_SECS,
            inventory_alert_interval_secs: booking::DEFAULT_ALERT_INTERVAL.as_secs(),
            wallet: None,
            card: None,
            log_json: false,
        }
    }
}
