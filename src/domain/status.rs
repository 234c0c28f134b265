use chrono::{DateTime, Duration, Utc};

use crate::domain::models::{DeviceStatus, SuppressionFlags, ThresholdSnapshot, Weather};
use crate::domain::monitoring_config::{MonitoringConfig, minutes};

/// Everything the evaluator looks at for one device.
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs<'a> {
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_txn_at: Option<DateTime<Utc>>,
    pub maintenance_reason: Option<&'a str>,
    pub active_fault: bool,
    pub weather: Option<&'a Weather>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusDecision {
    pub status: DeviceStatus,
    pub reason: String,
    pub thresholds: ThresholdSnapshot,
    pub suppression: SuppressionFlags,
}

/// Derives a device status. Rules are checked in precedence order and the
/// first match wins: maintenance, fault, offline, low activity, online.
///
/// Offline depends on heartbeat age only. Transaction recency can move a
/// device between online, idle and warning-low-activity but never to offline.
pub fn evaluate_status(
    inputs: &StatusInputs<'_>,
    config: &MonitoringConfig,
    now: DateTime<Utc>,
) -> StatusDecision {
    let is_busy = config.is_busy_at(now);
    let quiet_window = config.quiet_window_minutes(is_busy);
    let heartbeat_age = inputs.last_heartbeat_at.map(|at| age(now, at));
    let txn_age = inputs.last_txn_at.map(|at| age(now, at));

    let thresholds = ThresholdSnapshot {
        offline_threshold_minutes: config.offline_threshold_minutes,
        quiet_window_minutes: quiet_window,
        is_busy,
        heartbeat_age_minutes: heartbeat_age.map(|value| value.num_minutes()),
        txn_age_minutes: txn_age.map(|value| value.num_minutes()),
    };
    let decide = |status, reason: String, suppression| StatusDecision {
        status,
        reason,
        thresholds: thresholds.clone(),
        suppression,
    };

    if let Some(reason) = inputs.maintenance_reason {
        return decide(
            DeviceStatus::Maintenance,
            format!("maintenance mode enabled: {reason}"),
            SuppressionFlags {
                maintenance: true,
                ..SuppressionFlags::default()
            },
        );
    }

    if inputs.active_fault {
        return decide(
            DeviceStatus::Fault,
            "unresolved hardware fault".to_string(),
            SuppressionFlags::default(),
        );
    }

    let offline_threshold = minutes(config.offline_threshold_minutes);
    match heartbeat_age {
        None => {
            return decide(
                DeviceStatus::Offline,
                "no heartbeat has ever been recorded".to_string(),
                SuppressionFlags::default(),
            );
        }
        Some(age) if age > offline_threshold => {
            return decide(
                DeviceStatus::Offline,
                format!(
                    "no heartbeat for {} min (offline threshold {} min)",
                    age.num_minutes(),
                    config.offline_threshold_minutes
                ),
                SuppressionFlags::default(),
            );
        }
        Some(_) => {}
    }

    let Some(txn_age) = txn_age else {
        return decide(
            DeviceStatus::Online,
            "heartbeat fresh; no transaction recorded yet".to_string(),
            SuppressionFlags::default(),
        );
    };

    if txn_age <= minutes(quiet_window) {
        return decide(
            DeviceStatus::Online,
            "heartbeat fresh; transaction within quiet window".to_string(),
            SuppressionFlags::default(),
        );
    }

    let period = if is_busy { "busy" } else { "off-peak" };
    let gap = format!(
        "no transaction for {} min during {period} hours (quiet window {quiet_window} min)",
        txn_age.num_minutes()
    );

    if let Some(cause) = weather_suppression(config, inputs.weather, now) {
        return decide(
            DeviceStatus::Idle,
            format!("{gap}; suppressed by {cause}"),
            SuppressionFlags {
                weather: true,
                ..SuppressionFlags::default()
            },
        );
    }

    decide(
        DeviceStatus::WarningLowActivity,
        gap,
        SuppressionFlags {
            dashboard_only: true,
            ..SuppressionFlags::default()
        },
    )
}

/// Returns a description of the weather condition that explains low usage,
/// if suppression is enabled and one applies. Readings older than
/// `weather_max_age_minutes` are ignored.
pub fn weather_suppression(
    config: &MonitoringConfig,
    weather: Option<&Weather>,
    now: DateTime<Utc>,
) -> Option<String> {
    if !config.weather_suppression_enabled {
        return None;
    }
    let weather = weather?;
    if age(now, weather.observed_at) > minutes(config.weather_max_age_minutes) {
        return None;
    }

    if let Some(temperature) = weather.temperature_c {
        if temperature > config.hot_temp_c {
            return Some(format!(
                "heat ({temperature:.1}°C above {:.1}°C)",
                config.hot_temp_c
            ));
        }
        if temperature < config.cold_temp_c {
            return Some(format!(
                "cold ({temperature:.1}°C below {:.1}°C)",
                config.cold_temp_c
            ));
        }
    }

    if config.suppress_on_precipitation && weather.precipitation {
        return Some("precipitation".to_string());
    }

    None
}

// Future-dated telemetry counts as fresh.
fn age(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    (now - at).max(Duration::zero())
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{StatusInputs, evaluate_status};
    use crate::domain::models::{DeviceStatus, Weather};
    use crate::domain::monitoring_config::{MonitoringConfig, minutes};

    fn busy_afternoon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 10, 14, 0, 0).unwrap()
    }

    fn late_evening() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 10, 22, 0, 0).unwrap()
    }

    fn inputs(
        now: DateTime<Utc>,
        heartbeat_minutes_ago: i64,
        txn_minutes_ago: Option<i64>,
    ) -> StatusInputs<'static> {
        StatusInputs {
            last_heartbeat_at: Some(now - Duration::minutes(heartbeat_minutes_ago)),
            last_txn_at: txn_minutes_ago.map(|minutes| now - Duration::minutes(minutes)),
            maintenance_reason: None,
            active_fault: false,
            weather: None,
        }
    }

    #[test]
    fn stale_heartbeat_is_offline() {
        let now = busy_afternoon();
        let decision = evaluate_status(
            &inputs(now, 40, Some(5)),
            &MonitoringConfig::default(),
            now,
        );

        assert_eq!(decision.status, DeviceStatus::Offline);
        assert_eq!(decision.thresholds.heartbeat_age_minutes, Some(40));
    }

    #[test]
    fn heartbeat_exactly_at_threshold_is_not_offline() {
        let now = busy_afternoon();
        let decision = evaluate_status(
            &inputs(now, 30, Some(5)),
            &MonitoringConfig::default(),
            now,
        );

        assert_eq!(decision.status, DeviceStatus::Online);
    }

    #[test]
    fn missing_heartbeat_is_offline() {
        let now = busy_afternoon();
        let mut input = inputs(now, 0, Some(5));
        input.last_heartbeat_at = None;

        let decision = evaluate_status(&input, &MonitoringConfig::default(), now);
        assert_eq!(decision.status, DeviceStatus::Offline);
    }

    #[test]
    fn old_transaction_with_fresh_heartbeat_is_never_offline() {
        let now = busy_afternoon();
        let decision = evaluate_status(
            &inputs(now, 1, Some(60 * 24 * 14)),
            &MonitoringConfig::default(),
            now,
        );

        assert_ne!(decision.status, DeviceStatus::Offline);
        assert_eq!(decision.status, DeviceStatus::WarningLowActivity);
    }

    #[test]
    fn busy_hour_gap_is_low_activity_warning() {
        let now = busy_afternoon();
        let decision = evaluate_status(
            &inputs(now, 2, Some(120)),
            &MonitoringConfig::default(),
            now,
        );

        assert_eq!(decision.status, DeviceStatus::WarningLowActivity);
        assert!(decision.thresholds.is_busy);
        assert_eq!(decision.thresholds.quiet_window_minutes, 90);
        assert!(decision.suppression.dashboard_only);
    }

    #[test]
    fn same_gap_off_peak_stays_online() {
        let now = late_evening();
        let decision = evaluate_status(
            &inputs(now, 2, Some(120)),
            &MonitoringConfig::default(),
            now,
        );

        assert_eq!(decision.status, DeviceStatus::Online);
        assert!(!decision.thresholds.is_busy);
        assert_eq!(decision.thresholds.quiet_window_minutes, 180);
    }

    #[test]
    fn heat_suppresses_low_activity_to_idle() {
        let now = busy_afternoon();
        let weather = Weather {
            temperature_c: Some(38.0),
            precipitation: false,
            observed_at: now,
        };
        let mut input = inputs(now, 2, Some(180));
        input.weather = Some(&weather);

        let decision = evaluate_status(&input, &MonitoringConfig::default(), now);

        assert_eq!(decision.status, DeviceStatus::Idle);
        assert!(decision.suppression.weather);
        assert!(decision.reason.contains("heat"));
    }

    #[test]
    fn stale_weather_reading_no_longer_suppresses() {
        let now = busy_afternoon();
        let weather = Weather {
            temperature_c: Some(38.0),
            precipitation: false,
            observed_at: now - Duration::minutes(181),
        };
        let mut input = inputs(now, 2, Some(180));
        input.weather = Some(&weather);

        let decision = evaluate_status(&input, &MonitoringConfig::default(), now);
        assert_eq!(decision.status, DeviceStatus::WarningLowActivity);
        assert!(!decision.suppression.weather);

        let config = MonitoringConfig {
            weather_max_age_minutes: 240,
            ..MonitoringConfig::default()
        };
        assert_eq!(
            evaluate_status(&input, &config, now).status,
            DeviceStatus::Idle
        );
    }

    #[test]
    fn precipitation_suppresses_only_when_enabled() {
        let now = busy_afternoon();
        let weather = Weather {
            temperature_c: Some(18.0),
            precipitation: true,
            observed_at: now,
        };
        let mut input = inputs(now, 2, Some(180));
        input.weather = Some(&weather);

        let config = MonitoringConfig::default();
        assert_eq!(
            evaluate_status(&input, &config, now).status,
            DeviceStatus::Idle
        );

        let config = MonitoringConfig {
            suppress_on_precipitation: false,
            ..MonitoringConfig::default()
        };
        assert_eq!(
            evaluate_status(&input, &config, now).status,
            DeviceStatus::WarningLowActivity
        );

        let config = MonitoringConfig {
            weather_suppression_enabled: false,
            ..MonitoringConfig::default()
        };
        assert_eq!(
            evaluate_status(&input, &config, now).status,
            DeviceStatus::WarningLowActivity
        );
    }

    #[test]
    fn maintenance_wins_over_offline_and_fault() {
        let now = busy_afternoon();
        let mut input = inputs(now, 500, None);
        input.maintenance_reason = Some("pump replacement");
        input.active_fault = true;

        let decision = evaluate_status(&input, &MonitoringConfig::default(), now);

        assert_eq!(decision.status, DeviceStatus::Maintenance);
        assert!(decision.suppression.maintenance);
        assert!(decision.reason.contains("pump replacement"));
    }

    #[test]
    fn fault_wins_over_offline() {
        let now = busy_afternoon();
        let mut input = inputs(now, 500, None);
        input.active_fault = true;

        let decision = evaluate_status(&input, &MonitoringConfig::default(), now);
        assert_eq!(decision.status, DeviceStatus::Fault);
    }

    #[test]
    fn no_transaction_history_is_online_with_fresh_heartbeat() {
        let now = busy_afternoon();
        let decision = evaluate_status(&inputs(now, 3, None), &MonitoringConfig::default(), now);

        assert_eq!(decision.status, DeviceStatus::Online);
        assert_eq!(decision.thresholds.txn_age_minutes, None);
    }

    #[test]
    fn future_dated_heartbeat_counts_as_fresh() {
        let now = busy_afternoon();
        let decision = evaluate_status(
            &inputs(now, -10, Some(1)),
            &MonitoringConfig::default(),
            now,
        );

        assert_eq!(decision.status, DeviceStatus::Online);
        assert_eq!(decision.thresholds.heartbeat_age_minutes, Some(0));
    }
}
