use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::AppError;

const DEFAULT_DATABASE_URL: &str = "sqlite://classtodo.db?mode=rwc";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60 * 60;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub scan_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| AppError::Config(format!("BIND_ADDR is invalid: {}", e)))?;

        let scan_interval_secs = match lookup("SCAN_INTERVAL_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|e| AppError::Config(format!("SCAN_INTERVAL_SECS is invalid: {}", e)))?,
            None => DEFAULT_SCAN_INTERVAL_SECS,
        };
        if scan_interval_secs == 0 {
            return Err(AppError::Config(
                "SCAN_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            database_url,
            bind_addr,
            scan_interval: Duration::from_secs(scan_interval_secs),
        })
    }
}
