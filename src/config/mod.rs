//! Configuration module for the Vine Helper host.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default Brenda announcement endpoint.
pub const DEFAULT_BRENDA_URL: &str = "https://api.llamastories.com/brenda/product";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite file backing durable storage
    pub db_path: PathBuf,
    /// Storage quota in bytes (`None` disables the quota)
    pub storage_quota_bytes: Option<u64>,
    /// Quiet period before a list snapshot is written
    pub persist_debounce: Duration,
    /// Interval between retention sweeps
    pub gc_interval: Duration,
    /// How long hidden products are remembered
    pub hidden_retention: Duration,
    /// Brenda announcement endpoint
    pub brenda_url: String,
    /// Base rate-limit window between announcements
    pub brenda_rate_limit: Duration,
    /// Marketplace domain reported with announcements
    pub domain: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let db_path = env::var("VH_DB_PATH")
            .unwrap_or_else(|_| "./data/vine-helper.sqlite".to_string())
            .into();

        let quota: u64 = parse_var("VH_STORAGE_QUOTA_BYTES", 10 * 1024 * 1024);
        let storage_quota_bytes = (quota > 0).then_some(quota);

        let persist_debounce = Duration::from_millis(parse_var("VH_PERSIST_DEBOUNCE_MS", 1000));
        let gc_interval = Duration::from_secs(parse_var("VH_GC_INTERVAL_SECS", 60));
        let retention_days: u64 = parse_var("VH_HIDDEN_RETENTION_DAYS", 30);
        let hidden_retention = Duration::from_secs(retention_days * 24 * 60 * 60);

        let brenda_url = env::var("VH_BRENDA_URL").unwrap_or_else(|_| DEFAULT_BRENDA_URL.to_string());
        let brenda_rate_limit = Duration::from_secs(parse_var("VH_BRENDA_RATE_LIMIT_SECS", 10));

        let domain = env::var("VH_DOMAIN").unwrap_or_else(|_| "amazon.com".to_string());
        let log_level = env::var("VH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Self {
            db_path,
            storage_quota_bytes,
            persist_debounce,
            gc_interval,
            hidden_retention,
            brenda_url,
            brenda_rate_limit,
            domain,
            log_level,
        }
    }
}

/// Read a numeric variable, falling back to `default` when unset or malformed.
fn parse_var<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {} value {:?}, using {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
