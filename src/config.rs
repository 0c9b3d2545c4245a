// Runtime configuration loaded from environment variables

use anyhow::{Context, Result};
use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};
use tracing::info;

pub const DEFAULT_DB_PATH: &str = "jeton.db";
pub const DEFAULT_PORT: &str = "3000";
pub const DEFAULT_VALUATION_CACHE_TTL_MS: &str = "5000";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    /// Zero disables valuation caching
    pub valuation_cache_ttl: Duration,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let ttl_ms: u64 = try_load("JETON_VALUATION_CACHE_TTL_MS", DEFAULT_VALUATION_CACHE_TTL_MS)?;

        Ok(Self {
            db_path: try_load("JETON_DB_PATH", DEFAULT_DB_PATH)?,
            port: try_load("JETON_PORT", DEFAULT_PORT)?,
            valuation_cache_ttl: Duration::from_millis(ttl_ms),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            port: 3000,
            valuation_cache_ttl: Duration::from_millis(5000),
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    parse_value(key, &raw)
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| anyhow::anyhow!("{e}"))
        .with_context(|| format!("Invalid {key} value: '{raw}'"))
}
