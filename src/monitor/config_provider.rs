use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::adapters::db;
use crate::app::services::{ServiceError, SqliteStore};
use crate::domain::monitoring_config::{MonitoringConfig, MonitoringConfigOverride};
use crate::monitor::MonitorError;

pub const GLOBAL_CONFIG_KEY: &str = "monitoring";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
struct CachedConfig {
    config: MonitoringConfig,
    loaded_at: Instant,
}

/// Merged monitoring config per device, cached for a bounded TTL.
///
/// Loading never fails from the caller's point of view: a store error or an
/// invalid global document yields [`MonitoringConfig::default`], an invalid
/// device override is skipped. Failed loads are not cached, so the next call
/// retries the store.
pub struct ConfigProvider {
    store: SqliteStore,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedConfig>>,
}

impl ConfigProvider {
    pub fn new(store: SqliteStore, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, device_id: &str) -> MonitoringConfig {
        if let Some(cached) = self.cached(device_id) {
            return cached;
        }

        match self.load(device_id) {
            Ok(config) => {
                self.cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(
                        device_id.to_string(),
                        CachedConfig {
                            config: config.clone(),
                            loaded_at: Instant::now(),
                        },
                    );
                config
            }
            Err(error) => {
                tracing::warn!(
                    device_id,
                    error = %error,
                    "monitoring config unavailable; using built-in defaults"
                );
                MonitoringConfig::default()
            }
        }
    }

    /// The global document on its own, without any device override.
    pub fn global(&self) -> MonitoringConfig {
        match self.store.with_connection(load_global) {
            Ok(config) => config,
            Err(error) => {
                tracing::warn!(error = %error, "global monitoring config unavailable");
                MonitoringConfig::default()
            }
        }
    }

    pub fn set_global(
        &self,
        config: &MonitoringConfig,
        now: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        config.validate()?;
        let encoded = serde_json::to_string(config).map_err(db::DbError::from)?;
        self.store.with_connection(|connection| {
            db::put_config_entry(connection, GLOBAL_CONFIG_KEY, &encoded, now)
                .map_err(MonitorError::from)
        })?;
        self.invalidate_all();
        tracing::info!("global monitoring config updated");
        Ok(())
    }

    pub fn set_override(
        &self,
        device_id: &str,
        overlay: &MonitoringConfigOverride,
        now: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        self.global().with_override(overlay).validate()?;
        let encoded = serde_json::to_string(overlay).map_err(db::DbError::from)?;
        self.store.with_connection(|connection| {
            db::put_device_override(connection, device_id, &encoded, now)
                .map_err(MonitorError::from)
        })?;
        self.invalidate(device_id);
        tracing::info!(device_id, "device monitoring override updated");
        Ok(())
    }

    pub fn invalidate(&self, device_id: &str) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device_id);
    }

    pub fn invalidate_all(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn cached(&self, device_id: &str) -> Option<MonitoringConfig> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(device_id)
            .filter(|entry| entry.loaded_at.elapsed() < self.ttl)
            .map(|entry| entry.config.clone())
    }

    fn load(&self, device_id: &str) -> Result<MonitoringConfig, ServiceError> {
        self.store.with_connection(|connection| {
            let global = load_global(connection)?;
            let Some(raw) = db::get_device_override(connection, device_id)? else {
                return Ok(global);
            };

            let overlay = match serde_json::from_str::<MonitoringConfigOverride>(&raw) {
                Ok(overlay) => overlay,
                Err(error) => {
                    tracing::warn!(device_id, error = %error, "ignoring unreadable device override");
                    return Ok(global);
                }
            };

            let merged = global.with_override(&overlay);
            if let Err(error) = merged.validate() {
                tracing::warn!(device_id, error = %error, "ignoring invalid device override");
                return Ok(global);
            }
            Ok(merged)
        })
    }
}

fn load_global(connection: &rusqlite::Connection) -> Result<MonitoringConfig, ServiceError> {
    let Some(raw) = db::get_config_entry(connection, GLOBAL_CONFIG_KEY)? else {
        return Ok(MonitoringConfig::default());
    };

    let config = match serde_json::from_str::<MonitoringConfig>(&raw) {
        Ok(config) => config,
        Err(error) => {
            tracing::warn!(error = %error, "unreadable global monitoring config; using defaults");
            return Ok(MonitoringConfig::default());
        }
    };

    if let Err(error) = config.validate() {
        tracing::warn!(error = %error, "invalid global monitoring config; using defaults");
        return Ok(MonitoringConfig::default());
    }
    Ok(config)
}
