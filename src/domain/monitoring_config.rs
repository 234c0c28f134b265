use chrono::{DateTime, TimeDelta, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
    #[error("{field} must be an hour between 0 and 23, got {value}")]
    InvalidHour { field: &'static str, value: u32 },
    #[error("{field} must be greater than zero")]
    NonPositive { field: &'static str },
    #[error("{field} must be at most {max} minutes, got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        max: i64,
    },
    #[error("cold_temp_c must be lower than hot_temp_c")]
    InvertedTemperatureBand,
}

/// Upper bound for offline thresholds and quiet windows (7 days).
pub const MAX_WINDOW_MINUTES: i64 = 7 * 24 * 60;
/// Upper bound for the offline reminder interval (30 days).
pub const MAX_REMINDER_MINUTES: i64 = 30 * 24 * 60;

/// Thresholds and cadence that drive status evaluation for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringConfig {
    pub timezone: String,
    pub busy_start_hour: u32,
    pub busy_end_hour: u32,
    pub busy_quiet_minutes: i64,
    pub off_peak_quiet_minutes: i64,
    pub offline_threshold_minutes: i64,
    pub weather_suppression_enabled: bool,
    pub cold_temp_c: f64,
    pub hot_temp_c: f64,
    pub suppress_on_precipitation: bool,
    pub weather_max_age_minutes: i64,
    pub notify_on_first_offline: bool,
    pub notify_on_recovery: bool,
    pub reminder_interval_minutes: i64,
    pub recipients: Vec<String>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            busy_start_hour: 10,
            busy_end_hour: 19,
            busy_quiet_minutes: 90,
            off_peak_quiet_minutes: 180,
            offline_threshold_minutes: 30,
            weather_suppression_enabled: true,
            cold_temp_c: 5.0,
            hot_temp_c: 35.0,
            suppress_on_precipitation: true,
            weather_max_age_minutes: 180,
            notify_on_first_offline: true,
            notify_on_recovery: true,
            reminder_interval_minutes: 360,
            recipients: vec!["operations".to_string()],
        }
    }
}

impl MonitoringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;
        check_hour("busy_start_hour", self.busy_start_hour)?;
        check_hour("busy_end_hour", self.busy_end_hour)?;
        check_minutes("busy_quiet_minutes", self.busy_quiet_minutes, MAX_WINDOW_MINUTES)?;
        check_minutes(
            "off_peak_quiet_minutes",
            self.off_peak_quiet_minutes,
            MAX_WINDOW_MINUTES,
        )?;
        check_minutes(
            "offline_threshold_minutes",
            self.offline_threshold_minutes,
            MAX_WINDOW_MINUTES,
        )?;
        check_minutes(
            "weather_max_age_minutes",
            self.weather_max_age_minutes,
            MAX_WINDOW_MINUTES,
        )?;
        check_minutes(
            "reminder_interval_minutes",
            self.reminder_interval_minutes,
            MAX_REMINDER_MINUTES,
        )?;
        if self.cold_temp_c >= self.hot_temp_c {
            return Err(ConfigError::InvertedTemperatureBand);
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }

    /// Whether `now` falls inside the busy window in the configured timezone.
    /// A window whose start is after its end wraps past midnight; equal
    /// bounds mean no busy hours at all.
    pub fn is_busy_at(&self, now: DateTime<Utc>) -> bool {
        let tz = self.tz().unwrap_or(Tz::UTC);
        let hour = now.with_timezone(&tz).hour();
        let (start, end) = (self.busy_start_hour, self.busy_end_hour);

        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    pub fn quiet_window_minutes(&self, is_busy: bool) -> i64 {
        if is_busy {
            self.busy_quiet_minutes
        } else {
            self.off_peak_quiet_minutes
        }
    }

    pub fn with_override(&self, overlay: &MonitoringConfigOverride) -> Self {
        let mut merged = self.clone();
        overlay.apply(&mut merged);
        merged
    }
}

fn check_hour(field: &'static str, value: u32) -> Result<(), ConfigError> {
    if value > 23 {
        return Err(ConfigError::InvalidHour { field, value });
    }
    Ok(())
}

fn check_minutes(field: &'static str, value: i64, max: i64) -> Result<(), ConfigError> {
    if value <= 0 {
        return Err(ConfigError::NonPositive { field });
    }
    if value > max {
        return Err(ConfigError::OutOfRange { field, value, max });
    }
    Ok(())
}

/// Minute count as a duration. Values past chrono's range saturate instead of
/// panicking, so a config that slipped past validation still evaluates.
pub fn minutes(value: i64) -> TimeDelta {
    TimeDelta::try_minutes(value).unwrap_or(TimeDelta::MAX)
}

/// Per-device subset of [`MonitoringConfig`]; present fields win.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitoringConfigOverride {
    pub timezone: Option<String>,
    pub busy_start_hour: Option<u32>,
    pub busy_end_hour: Option<u32>,
    pub busy_quiet_minutes: Option<i64>,
    pub off_peak_quiet_minutes: Option<i64>,
    pub offline_threshold_minutes: Option<i64>,
    pub weather_suppression_enabled: Option<bool>,
    pub cold_temp_c: Option<f64>,
    pub hot_temp_c: Option<f64>,
    pub suppress_on_precipitation: Option<bool>,
    pub weather_max_age_minutes: Option<i64>,
    pub notify_on_first_offline: Option<bool>,
    pub notify_on_recovery: Option<bool>,
    pub reminder_interval_minutes: Option<i64>,
    pub recipients: Option<Vec<String>>,
}

impl MonitoringConfigOverride {
    pub fn apply(&self, target: &mut MonitoringConfig) {
        if let Some(value) = &self.timezone {
            target.timezone.clone_from(value);
        }
        if let Some(value) = &self.recipients {
            target.recipients.clone_from(value);
        }
        overlay(&mut target.busy_start_hour, self.busy_start_hour);
        overlay(&mut target.busy_end_hour, self.busy_end_hour);
        overlay(&mut target.busy_quiet_minutes, self.busy_quiet_minutes);
        overlay(&mut target.off_peak_quiet_minutes, self.off_peak_quiet_minutes);
        overlay(
            &mut target.offline_threshold_minutes,
            self.offline_threshold_minutes,
        );
        overlay(
            &mut target.weather_suppression_enabled,
            self.weather_suppression_enabled,
        );
        overlay(&mut target.cold_temp_c, self.cold_temp_c);
        overlay(&mut target.hot_temp_c, self.hot_temp_c);
        overlay(
            &mut target.suppress_on_precipitation,
            self.suppress_on_precipitation,
        );
        overlay(
            &mut target.weather_max_age_minutes,
            self.weather_max_age_minutes,
        );
        overlay(
            &mut target.notify_on_first_offline,
            self.notify_on_first_offline,
        );
        overlay(&mut target.notify_on_recovery, self.notify_on_recovery);
        overlay(
            &mut target.reminder_interval_minutes,
            self.reminder_interval_minutes,
        );
    }
}

fn overlay<T: Copy>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}
