use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};
use station_monitor::adapters::db::{AlertFilter, open_connection, run_migrations};
use station_monitor::adapters::notify::RecordingNotifier;
use station_monitor::app::services::SqliteStore;
use station_monitor::domain::clock::ManualClock;
use station_monitor::domain::models::{
    AlertMetadata, AlertType, DeviceStatus, HeartbeatSource, NewAlert, NewDevice, Severity,
    Weather,
};
use station_monitor::domain::uptime::{OfflineInterval, UptimeWindow, offline_duration, uptime_percent};
use station_monitor::monitor::{Monitor, MonitorSettings};
use tempfile::TempDir;

struct Harness {
    monitor: Arc<Monitor>,
    notifier: Arc<RecordingNotifier>,
    clock: Arc<ManualClock>,
    _dir: TempDir,
}

fn busy_afternoon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 10, 14, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("monitor.sqlite");
    let mut connection =
        open_connection(path.to_string_lossy().as_ref()).expect("db should open");
    run_migrations(&mut connection).expect("migrations should succeed");

    let notifier = Arc::new(RecordingNotifier::new());
    let clock = Arc::new(ManualClock::new(busy_afternoon()));
    let monitor = Arc::new(Monitor::new(
        SqliteStore::new(Arc::new(Mutex::new(connection))),
        notifier.clone(),
        clock.clone(),
        MonitorSettings::default(),
    ));

    Harness {
        monitor,
        notifier,
        clock,
        _dir: dir,
    }
}

fn register(harness: &Harness, id: &str) {
    harness
        .monitor
        .register_device(&NewDevice {
            id: id.to_string(),
            label: format!("Bay {id}"),
            location: "Harbour Road".to_string(),
            terminal_id: None,
        })
        .expect("device should register");
}

fn open_alerts(harness: &Harness, id: &str) -> Vec<AlertType> {
    harness
        .monitor
        .list_alerts(&AlertFilter {
            device_id: Some(id.to_string()),
            open_only: true,
            ..AlertFilter::default()
        })
        .expect("alerts should load")
        .into_iter()
        .map(|alert| alert.alert_type)
        .collect()
}

#[test]
fn canonical_scenarios_pass_and_leave_no_devices_behind() {
    let harness = harness();

    let reports = harness
        .monitor
        .run_acceptance_suite()
        .expect("suite should run");

    assert_eq!(reports.len(), 7);
    for report in &reports {
        assert!(report.passed, "{} failed: {:?}", report.name, report.mismatches);
    }
    assert!(harness.notifier.sent().is_empty());
    assert!(harness.monitor.list_devices().expect("devices").is_empty());
}

#[test]
fn repeated_evaluation_is_idempotent() {
    let harness = harness();
    register(&harness, "st-1");
    harness
        .monitor
        .ingest_heartbeat("st-1", HeartbeatSource::Transaction)
        .expect("ingest");
    harness.clock.advance(Duration::minutes(40));

    let first = harness.monitor.evaluate("st-1").expect("evaluate");
    assert!(first.changed);
    let events_before = harness
        .monitor
        .list_audit_events("st-1", 500)
        .expect("events")
        .len();

    let second = harness.monitor.evaluate("st-1").expect("evaluate");
    assert!(!second.changed);
    assert_eq!(second.status(), DeviceStatus::Offline);
    assert!(second.alert_raised.is_none());
    assert_eq!(
        harness
            .monitor
            .list_audit_events("st-1", 500)
            .expect("events")
            .len(),
        events_before
    );
    assert_eq!(open_alerts(&harness, "st-1"), vec![AlertType::Offline]);
    assert_eq!(harness.notifier.count_with_subject_prefix("[offline]"), 1);
}

#[test]
fn concurrent_alert_creation_yields_one_open_alert() {
    let harness = harness();
    register(&harness, "st-1");

    thread::scope(|scope| {
        for _ in 0..8 {
            let monitor = Arc::clone(&harness.monitor);
            scope.spawn(move || {
                monitor
                    .create_alert(&NewAlert {
                        device_id: "st-1".to_string(),
                        alert_type: AlertType::RedemptionError,
                        severity: Severity::Warn,
                        message: "voucher redemption failed".to_string(),
                        dashboard_only: true,
                        metadata: AlertMetadata::default(),
                    })
                    .expect("create should succeed");
            });
        }
    });

    assert_eq!(open_alerts(&harness, "st-1"), vec![AlertType::RedemptionError]);
    let device = harness.monitor.get_device("st-1").expect("device");
    assert_eq!(device.alerts_open, 1);
}

#[test]
fn offline_follows_heartbeat_age_only() {
    let harness = harness();
    register(&harness, "st-1");
    let now = busy_afternoon();

    // Sales stopped ten hours ago, but pings keep arriving.
    harness
        .monitor
        .ingest_heartbeat_at("st-1", HeartbeatSource::Transaction, now - Duration::hours(10))
        .expect("ingest");
    let fresh = harness
        .monitor
        .ingest_heartbeat_at("st-1", HeartbeatSource::Ping, now - Duration::minutes(29))
        .expect("ingest");
    assert_ne!(fresh.status(), DeviceStatus::Offline);

    harness.clock.advance(Duration::minutes(2));
    let stale = harness.monitor.evaluate("st-1").expect("evaluate");
    assert_eq!(stale.status(), DeviceStatus::Offline);
    assert_eq!(stale.decision.thresholds.heartbeat_age_minutes, Some(31));
}

#[test]
fn maintenance_outranks_a_stale_heartbeat() {
    let harness = harness();
    register(&harness, "st-1");
    harness
        .monitor
        .ingest_heartbeat("st-1", HeartbeatSource::Ping)
        .expect("ingest");
    harness
        .monitor
        .set_maintenance("st-1", true, Some("pump swap"), "ops")
        .expect("maintenance");

    harness.clock.advance(Duration::hours(3));
    let outcome = harness.monitor.evaluate("st-1").expect("evaluate");

    assert_eq!(outcome.status(), DeviceStatus::Maintenance);
    assert!(outcome.decision.suppression.maintenance);
    assert!(open_alerts(&harness, "st-1").is_empty());
    assert!(harness.notifier.sent().is_empty());
}

#[test]
fn recovery_sends_exactly_one_notification() {
    let harness = harness();
    register(&harness, "st-1");
    harness
        .monitor
        .ingest_heartbeat("st-1", HeartbeatSource::Transaction)
        .expect("ingest");
    harness.clock.advance(Duration::minutes(45));
    harness.monitor.evaluate("st-1").expect("evaluate");

    let recovered = harness
        .monitor
        .ingest_heartbeat("st-1", HeartbeatSource::Transaction)
        .expect("ingest");
    assert_eq!(recovered.previous, DeviceStatus::Offline);
    assert_eq!(recovered.status(), DeviceStatus::Online);
    assert!(recovered.recovery_notified);
    assert_eq!(recovered.alerts_resolved.len(), 1);

    harness
        .monitor
        .ingest_heartbeat("st-1", HeartbeatSource::Transaction)
        .expect("ingest");
    harness.monitor.evaluate("st-1").expect("evaluate");

    assert_eq!(harness.notifier.count_with_subject_prefix("[recovered]"), 1);
    assert!(open_alerts(&harness, "st-1").is_empty());
    assert_eq!(harness.monitor.get_device("st-1").expect("device").alerts_open, 0);
}

#[test]
fn hot_weather_turns_a_sales_gap_into_idle() {
    let harness = harness();
    register(&harness, "st-1");
    let now = busy_afternoon();
    harness
        .monitor
        .set_weather(
            None,
            &Weather {
                temperature_c: Some(38.0),
                precipitation: false,
                observed_at: now,
            },
        )
        .expect("weather");

    harness
        .monitor
        .ingest_heartbeat_at("st-1", HeartbeatSource::Transaction, now - Duration::hours(3))
        .expect("ingest");
    let outcome = harness
        .monitor
        .ingest_heartbeat("st-1", HeartbeatSource::Ping)
        .expect("ingest");

    assert_eq!(outcome.status(), DeviceStatus::Idle);
    assert!(outcome.decision.suppression.weather);
    assert!(open_alerts(&harness, "st-1").is_empty());
    assert!(harness.notifier.sent().is_empty());
}

#[test]
fn forty_minute_silence_goes_offline_with_one_notified_alert() {
    let harness = harness();
    register(&harness, "st-1");
    harness
        .monitor
        .ingest_heartbeat("st-1", HeartbeatSource::Ping)
        .expect("ingest");
    harness.clock.advance(Duration::minutes(40));

    let outcome = harness.monitor.evaluate("st-1").expect("evaluate");

    assert_eq!(outcome.status(), DeviceStatus::Offline);
    let alerts = harness
        .monitor
        .list_alerts(&AlertFilter {
            device_id: Some("st-1".to_string()),
            ..AlertFilter::default()
        })
        .expect("alerts");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::Offline);
    assert!(alerts[0].metadata.notified);
    assert_eq!(harness.notifier.count_with_subject_prefix("[offline]"), 1);
}

#[test]
fn busy_hour_gap_raises_a_dashboard_only_warning() {
    let harness = harness();
    register(&harness, "st-1");
    let now = busy_afternoon();
    harness
        .monitor
        .ingest_heartbeat_at("st-1", HeartbeatSource::Transaction, now - Duration::hours(2))
        .expect("ingest");

    let outcome = harness
        .monitor
        .ingest_heartbeat("st-1", HeartbeatSource::Ping)
        .expect("ingest");

    assert_eq!(outcome.status(), DeviceStatus::WarningLowActivity);
    let alert = outcome.alert_raised.expect("warning alert");
    assert_eq!(alert.alert_type, AlertType::LowActivityWarning);
    assert!(alert.dashboard_only);
    assert!(harness.notifier.sent().is_empty());
}

#[test]
fn uptime_stays_within_bounds() {
    let now = busy_afternoon();
    let cases = [
        Vec::new(),
        vec![OfflineInterval {
            started_at: now - Duration::days(30),
            ended_at: None,
        }],
        vec![OfflineInterval {
            started_at: now + Duration::hours(1),
            ended_at: Some(now + Duration::hours(2)),
        }],
        vec![
            OfflineInterval {
                started_at: now - Duration::hours(5),
                ended_at: Some(now - Duration::hours(4)),
            },
            OfflineInterval {
                started_at: now - Duration::days(9),
                ended_at: Some(now - Duration::hours(1)),
            },
        ],
    ];

    for intervals in &cases {
        for window in [UptimeWindow::Daily, UptimeWindow::Weekly] {
            let percent = uptime_percent(offline_duration(intervals, window, now), window);
            assert!((0.0..=100.0).contains(&percent), "{percent} out of range");
        }
    }
}
