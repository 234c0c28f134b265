//! Scripted acceptance scenarios.
//!
//! A scenario resets its device to a blank online baseline, replays synthetic
//! telemetry, forces one evaluation and compares the result with what the
//! scenario expects. Runs use a recording notifier, so nothing reaches the
//! real notification sink. The suite replays on its own in-memory database,
//! so the live sweeper and ingest path never see scenario devices.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::adapters::db::{self, AlertFilter};
use crate::adapters::notify::RecordingNotifier;
use crate::app::services::{SqliteStore, StationQueryHandler};
use crate::domain::clock::ManualClock;
use crate::domain::models::{AlertType, DeviceStatus, HeartbeatSource, NewDevice, Weather};
use crate::domain::monitoring_config::MonitoringConfigOverride;
use crate::monitor::{Monitor, MonitorError, MonitorSettings};

pub const HARNESS_ACTOR: &str = "acceptance-harness";

const NEUTRAL_TEMPERATURE_C: f64 = 20.0;

#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioInput {
    Heartbeat {
        minutes_before: i64,
        source: HeartbeatSource,
    },
    /// An intermediate evaluation pass, so the final pass sees a prior state.
    Evaluate { minutes_before: i64 },
}

impl ScenarioInput {
    fn minutes_before(&self) -> i64 {
        match self {
            Self::Heartbeat { minutes_before, .. } | Self::Evaluate { minutes_before } => {
                *minutes_before
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    pub status: DeviceStatus,
    /// Open alert expected after the final pass; `None` means no open alert.
    pub alert: Option<AlertType>,
    pub notification_sent: bool,
    pub suppressed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub device_id: String,
    pub evaluate_at: DateTime<Utc>,
    pub inputs: Vec<ScenarioInput>,
    pub weather: Option<Weather>,
    pub config_override: Option<MonitoringConfigOverride>,
    pub maintenance: Option<String>,
    pub expected: Expectation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    pub name: String,
    pub device_id: String,
    pub passed: bool,
    pub mismatches: Vec<String>,
    pub status: DeviceStatus,
    pub open_alerts: Vec<AlertType>,
    pub notifications: usize,
    pub suppressed: bool,
}

/// A fresh in-memory database carrying the current schema.
pub fn isolated_store() -> Result<SqliteStore, MonitorError> {
    let mut connection = db::open_connection(":memory:")?;
    db::run_migrations(&mut connection)?;
    Ok(SqliteStore::new(Arc::new(Mutex::new(connection))))
}

/// Replays one scenario against `store`. Callers own serialization: nothing
/// else may evaluate the scenario device while it runs.
pub fn run_scenario(store: &SqliteStore, scenario: &Scenario) -> Result<ScenarioReport, MonitorError> {
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = Arc::new(ManualClock::new(scenario.evaluate_at));
    let monitor = Monitor::new(
        store.clone(),
        notifier.clone(),
        clock.clone(),
        MonitorSettings::default(),
    );
    let device_id = scenario.device_id.as_str();

    let existed = store.get_device(device_id)?.is_some();
    store.with_transaction(|tx| {
        if !existed {
            db::upsert_device(
                tx,
                &NewDevice {
                    id: device_id.to_string(),
                    label: format!("acceptance {}", scenario.name),
                    location: "acceptance".to_string(),
                    terminal_id: None,
                },
                scenario.evaluate_at,
            )?;
        }
        db::reset_device(tx, device_id, DeviceStatus::Online)?;
        // A device-scoped reading shadows whatever global weather is stored.
        let weather = scenario.weather.unwrap_or(Weather {
            temperature_c: Some(NEUTRAL_TEMPERATURE_C),
            precipitation: false,
            observed_at: scenario.evaluate_at,
        });
        db::put_weather(tx, device_id, &weather)?;
        Ok::<_, MonitorError>(())
    })?;

    let result = replay(&monitor, &notifier, &clock, scenario);

    if !existed {
        let cleanup = store.with_connection(|connection| {
            db::delete_device(connection, device_id).map_err(MonitorError::from)
        });
        if let Err(error) = cleanup {
            tracing::warn!(device_id, error = %error, "failed to remove scenario device");
        }
    }

    let report = result?;
    if report.passed {
        tracing::info!(scenario = %report.name, "acceptance scenario passed");
    } else {
        tracing::warn!(
            scenario = %report.name,
            mismatches = ?report.mismatches,
            "acceptance scenario failed"
        );
    }
    Ok(report)
}

fn replay(
    monitor: &Monitor,
    notifier: &RecordingNotifier,
    clock: &ManualClock,
    scenario: &Scenario,
) -> Result<ScenarioReport, MonitorError> {
    let device_id = scenario.device_id.as_str();

    if let Some(overlay) = &scenario.config_override {
        monitor.set_device_override(device_id, overlay)?;
    }

    let mut inputs = scenario.inputs.clone();
    inputs.sort_by_key(|input| std::cmp::Reverse(input.minutes_before()));

    for input in &inputs {
        let at = scenario.evaluate_at - Duration::minutes(input.minutes_before());
        match input {
            ScenarioInput::Heartbeat { source, .. } => {
                monitor.store().with_connection(|connection| {
                    db::record_heartbeat(
                        connection,
                        device_id,
                        at,
                        *source == HeartbeatSource::Transaction,
                    )
                    .map_err(MonitorError::from)
                })?;
            }
            ScenarioInput::Evaluate { .. } => {
                clock.set(at);
                monitor.evaluate(device_id)?;
            }
        }
    }

    clock.set(scenario.evaluate_at);
    if let Some(reason) = &scenario.maintenance {
        monitor.set_maintenance(device_id, true, Some(reason.as_str()), HARNESS_ACTOR)?;
    }

    notifier.clear();
    let outcome = monitor.evaluate(device_id)?;
    let open_alerts: Vec<AlertType> = monitor
        .list_alerts(&AlertFilter {
            device_id: Some(device_id.to_string()),
            open_only: true,
            ..AlertFilter::default()
        })?
        .into_iter()
        .map(|alert| alert.alert_type)
        .collect();
    let notifications = notifier.sent().len();
    let suppressed = outcome.decision.suppression.weather || outcome.decision.suppression.maintenance;

    let expected = &scenario.expected;
    let mut mismatches = Vec::new();
    if outcome.status() != expected.status {
        mismatches.push(format!(
            "status: expected {}, got {}",
            expected.status,
            outcome.status()
        ));
    }
    match expected.alert {
        Some(alert_type) if !open_alerts.contains(&alert_type) => {
            mismatches.push(format!("alert: expected open {alert_type}, got {open_alerts:?}"));
        }
        None if !open_alerts.is_empty() => {
            mismatches.push(format!("alert: expected none, got {open_alerts:?}"));
        }
        _ => {}
    }
    if (notifications > 0) != expected.notification_sent {
        mismatches.push(format!(
            "notification: expected sent={}, got {notifications}",
            expected.notification_sent
        ));
    }
    if suppressed != expected.suppressed {
        mismatches.push(format!(
            "suppression: expected {}, got {suppressed}",
            expected.suppressed
        ));
    }

    Ok(ScenarioReport {
        name: scenario.name.clone(),
        device_id: device_id.to_string(),
        passed: mismatches.is_empty(),
        mismatches,
        status: outcome.status(),
        open_alerts,
        notifications,
        suppressed,
    })
}

/// Thresholds the canonical scenarios are written against, pinned so that
/// edits to the global config cannot change their outcome.
pub fn baseline_override() -> MonitoringConfigOverride {
    MonitoringConfigOverride {
        timezone: Some("UTC".to_string()),
        busy_start_hour: Some(10),
        busy_end_hour: Some(19),
        busy_quiet_minutes: Some(90),
        off_peak_quiet_minutes: Some(180),
        offline_threshold_minutes: Some(30),
        weather_suppression_enabled: Some(true),
        cold_temp_c: Some(5.0),
        hot_temp_c: Some(35.0),
        suppress_on_precipitation: Some(true),
        weather_max_age_minutes: Some(180),
        notify_on_first_offline: Some(true),
        notify_on_recovery: Some(true),
        reminder_interval_minutes: Some(360),
        recipients: Some(vec!["acceptance".to_string()]),
    }
}

fn wednesday_at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 10, hour, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn ping(minutes_before: i64) -> ScenarioInput {
    ScenarioInput::Heartbeat {
        minutes_before,
        source: HeartbeatSource::Ping,
    }
}

fn transaction(minutes_before: i64) -> ScenarioInput {
    ScenarioInput::Heartbeat {
        minutes_before,
        source: HeartbeatSource::Transaction,
    }
}

fn scenario(
    name: &str,
    evaluate_at: DateTime<Utc>,
    inputs: Vec<ScenarioInput>,
    expected: Expectation,
) -> Scenario {
    Scenario {
        name: name.to_string(),
        device_id: format!("acceptance-{name}"),
        evaluate_at,
        inputs,
        weather: None,
        config_override: Some(baseline_override()),
        maintenance: None,
        expected,
    }
}

pub fn canonical_scenarios() -> Vec<Scenario> {
    let busy = wednesday_at(14);
    let off_peak = wednesday_at(22);

    vec![
        // 150 min without a sale is inside the 180 min off-peak window.
        scenario(
            "quiet-day",
            off_peak,
            vec![transaction(150), ping(5)],
            Expectation {
                status: DeviceStatus::Online,
                alert: None,
                notification_sent: false,
                suppressed: false,
            },
        ),
        scenario(
            "busy-hour-gap",
            busy,
            vec![transaction(120), ping(5)],
            Expectation {
                status: DeviceStatus::WarningLowActivity,
                alert: Some(AlertType::LowActivityWarning),
                notification_sent: false,
                suppressed: false,
            },
        ),
        scenario(
            "hard-offline",
            busy,
            vec![transaction(40)],
            Expectation {
                status: DeviceStatus::Offline,
                alert: Some(AlertType::Offline),
                notification_sent: true,
                suppressed: false,
            },
        ),
        scenario(
            "recovery",
            busy,
            vec![
                transaction(120),
                ScenarioInput::Evaluate { minutes_before: 60 },
                transaction(0),
            ],
            Expectation {
                status: DeviceStatus::Online,
                alert: None,
                notification_sent: true,
                suppressed: false,
            },
        ),
        Scenario {
            weather: Some(Weather {
                temperature_c: Some(38.0),
                precipitation: false,
                observed_at: busy,
            }),
            ..scenario(
                "weather",
                busy,
                vec![transaction(180), ping(5)],
                Expectation {
                    status: DeviceStatus::Idle,
                    alert: None,
                    notification_sent: false,
                    suppressed: true,
                },
            )
        },
        Scenario {
            maintenance: Some("bay refurbishment".to_string()),
            ..scenario(
                "maintenance",
                busy,
                vec![transaction(90), ScenarioInput::Evaluate { minutes_before: 30 }],
                Expectation {
                    status: DeviceStatus::Maintenance,
                    alert: None,
                    notification_sent: false,
                    suppressed: true,
                },
            )
        },
        Scenario {
            config_override: Some(MonitoringConfigOverride {
                offline_threshold_minutes: Some(10),
                ..baseline_override()
            }),
            ..scenario(
                "threshold-override",
                busy,
                vec![transaction(15)],
                Expectation {
                    status: DeviceStatus::Offline,
                    alert: Some(AlertType::Offline),
                    notification_sent: true,
                    suppressed: false,
                },
            )
        },
    ]
}

impl Monitor {
    /// Runs every canonical scenario on an isolated store. The live store,
    /// its devices and the real notifier are left untouched.
    pub fn run_acceptance_suite(&self) -> Result<Vec<ScenarioReport>, MonitorError> {
        let store = isolated_store()?;
        let mut reports = Vec::new();
        for scenario in canonical_scenarios() {
            reports.push(run_scenario(&store, &scenario)?);
        }

        let passed = reports.iter().filter(|report| report.passed).count();
        tracing::info!(passed, total = reports.len(), "acceptance suite finished");
        Ok(reports)
    }
}
