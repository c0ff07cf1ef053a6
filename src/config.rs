//! Runtime configuration
//!
//! Values come from the process environment, after loading a `.env` file if
//! one is present. Unparseable numbers fall back to their defaults.

use std::time::Duration;
use tracing::warn;

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost:5432/mandate-desk";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Database connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
    /// Per-transaction row-lock wait. `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 10,
            connection_timeout: Duration::from_secs(30),
            lock_timeout: Some(Duration::from_millis(5000)),
        }
    }
}

/// Inactivity watchdog settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub bind_addr: String,
    pub watchdog: WatchdogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `.env` (if any) and read the environment.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let lock_timeout_ms = parse_or(
            &lookup,
            "MANDATE_LOCK_TIMEOUT_MS",
            defaults
                .database
                .lock_timeout
                .map_or(0, |d| d.as_millis() as u64),
        );

        Self {
            database: DatabaseConfig {
                database_url: lookup("DATABASE_URL")
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or(defaults.database.database_url),
                max_connections: parse_or(
                    &lookup,
                    "DATABASE_POOL_SIZE",
                    defaults.database.max_connections,
                ),
                connection_timeout: Duration::from_secs(parse_or(
                    &lookup,
                    "DATABASE_CONNECT_TIMEOUT_SECS",
                    defaults.database.connection_timeout.as_secs(),
                )),
                lock_timeout: (lock_timeout_ms > 0).then(|| Duration::from_millis(lock_timeout_ms)),
            },
            bind_addr: lookup("MANDATE_BIND_ADDR")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.bind_addr),
            watchdog: WatchdogConfig {
                idle_timeout: Duration::from_secs(parse_or(
                    &lookup,
                    "MANDATE_IDLE_TIMEOUT_SECS",
                    defaults.watchdog.idle_timeout.as_secs(),
                )),
                sweep_interval: Duration::from_secs(
                    parse_or(
                        &lookup,
                        "MANDATE_WATCHDOG_SWEEP_SECS",
                        defaults.watchdog.sweep_interval.as_secs(),
                    )
                    .max(1),
                ),
            },
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid {}={:?}, using {}", key, raw, default);
                default
            }
        },
        None => default,
    }
}

/// Hide the password portion of a database URL for logging.
pub fn mask_database_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let mut masked = parsed.clone();
        if parsed.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    } else {
        let chars: Vec<char> = url.chars().collect();
        if chars.len() > 20 {
            let head: String = chars[..10].iter().collect();
            let tail: String = chars[chars.len() - 10..].iter().collect();
            format!("{}***{}", head, tail)
        } else {
            "***".to_string()
        }
    }
}
