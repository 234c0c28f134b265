use chrono::{DateTime, Utc};

use crate::adapters::db;
use crate::domain::uptime::{UptimeWindow, offline_duration, uptime_percent};
use crate::monitor::{Monitor, MonitorError};

#[derive(Debug, Clone, PartialEq)]
pub struct UptimeReport {
    pub device_id: String,
    pub window: UptimeWindow,
    pub percent: f64,
    pub offline_minutes: i64,
    /// `false` when the offline history could not be read and `percent` is
    /// the fail-open 100.
    pub data_available: bool,
}

impl UptimeReport {
    fn unavailable(device_id: &str, window: UptimeWindow) -> Self {
        Self {
            device_id: device_id.to_string(),
            window,
            percent: 100.0,
            offline_minutes: 0,
            data_available: false,
        }
    }
}

impl Monitor {
    pub fn uptime(&self, device_id: &str, window: UptimeWindow) -> Result<UptimeReport, MonitorError> {
        self.uptime_at(device_id, window, self.now())
    }

    pub fn uptime_at(
        &self,
        device_id: &str,
        window: UptimeWindow,
        now: DateTime<Utc>,
    ) -> Result<UptimeReport, MonitorError> {
        let since = now - window.length();
        let lookup = self.store().with_connection(|connection| {
            if db::get_device(connection, device_id)?.is_none() {
                return Ok(None);
            }
            db::list_offline_intervals(connection, device_id, since)
                .map(Some)
                .map_err(MonitorError::from)
        });

        match lookup {
            Ok(Some(intervals)) => {
                let offline = offline_duration(&intervals, window, now);
                Ok(UptimeReport {
                    device_id: device_id.to_string(),
                    window,
                    percent: uptime_percent(offline, window),
                    offline_minutes: offline.num_minutes(),
                    data_available: true,
                })
            }
            Ok(None) => Err(MonitorError::DeviceNotFound(device_id.to_string())),
            Err(error) => {
                tracing::warn!(
                    device_id,
                    window = ?window,
                    error = %error,
                    "offline history unavailable; reporting full uptime"
                );
                Ok(UptimeReport::unavailable(device_id, window))
            }
        }
    }

    /// Stores daily and weekly uptime on the device. Returns `false` without
    /// writing when either figure is a fail-open placeholder.
    pub fn refresh_uptime(&self, device_id: &str) -> Result<bool, MonitorError> {
        let now = self.now();
        let daily = self.uptime_at(device_id, UptimeWindow::Daily, now)?;
        let weekly = self.uptime_at(device_id, UptimeWindow::Weekly, now)?;
        if !daily.data_available || !weekly.data_available {
            return Ok(false);
        }

        self.store().with_connection(|connection| {
            db::set_device_uptime(connection, device_id, daily.percent, weekly.percent)
                .map_err(MonitorError::from)
        })?;
        Ok(true)
    }
}
