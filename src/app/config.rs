use std::time::Duration;

use crate::app::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub http_bind: String,
    pub sweep_interval_secs: u64,
    pub sweep_workers: usize,
    pub config_cache_ttl_secs: u64,
    pub notify_webhook_url: Option<String>,
    pub notify_timeout_secs: u64,
}

impl AppConfig {
    /// Reads the process environment after loading a `.env` file, if one
    /// exists in the working directory.
    pub fn from_env() -> Result<Self, AppError> {
        if let Err(error) = dotenvy::dotenv()
            && !error.not_found()
        {
            return Err(AppError::config(format!("failed to load .env: {error}")));
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sweep_workers = parse_or_default(&lookup, "SWEEP_WORKERS", 4_usize)?;
        if sweep_workers == 0 {
            return Err(AppError::config("SWEEP_WORKERS must be at least 1"));
        }
        let sweep_interval_secs = parse_or_default(&lookup, "SWEEP_INTERVAL_SECS", 300_u64)?;
        if sweep_interval_secs == 0 {
            return Err(AppError::config("SWEEP_INTERVAL_SECS must be at least 1"));
        }

        Ok(Self {
            db_path: non_empty(&lookup, "DB_PATH")
                .unwrap_or_else(|| "/var/lib/station-monitor/monitor.db".to_string()),
            http_bind: non_empty(&lookup, "HTTP_BIND").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            sweep_interval_secs,
            sweep_workers,
            config_cache_ttl_secs: parse_or_default(&lookup, "CONFIG_CACHE_TTL_SECS", 900_u64)?,
            notify_webhook_url: non_empty(&lookup, "NOTIFY_WEBHOOK_URL"),
            notify_timeout_secs: parse_or_default(&lookup, "NOTIFY_TIMEOUT_SECS", 10_u64)?,
        })
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn config_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.config_cache_ttl_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}
