use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;

use crate::adapters::db::{open_connection, run_migrations};
use crate::adapters::notify::RecordingNotifier;
use crate::app::services::SqliteStore;
use crate::domain::clock::ManualClock;
use crate::domain::models::NewDevice;
use crate::monitor::{Monitor, MonitorSettings};

static TEST_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn open_test_connection(test_name: &str) -> Connection {
    let template = ensure_template_db();
    let test_db_path = unique_test_db_path(test_name);

    if let Some(parent) = test_db_path.parent() {
        std::fs::create_dir_all(parent).expect("test db dir should be creatable");
    }

    std::fs::copy(&template, &test_db_path).expect("template db should be copied");
    open_connection(test_db_path.to_string_lossy().as_ref()).expect("test db should open")
}

pub fn open_test_store(test_name: &str) -> SqliteStore {
    SqliteStore::new(Arc::new(Mutex::new(open_test_connection(test_name))))
}

/// A Wednesday afternoon, inside the default 10:00-19:00 UTC busy window.
pub fn busy_afternoon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 10, 14, 0, 0).unwrap()
}

pub struct TestMonitor {
    pub monitor: Arc<Monitor>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

pub fn test_monitor(test_name: &str) -> TestMonitor {
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = Arc::new(ManualClock::new(busy_afternoon()));
    let monitor = Arc::new(Monitor::new(
        open_test_store(test_name),
        notifier.clone(),
        clock.clone(),
        MonitorSettings::default(),
    ));

    TestMonitor {
        monitor,
        notifier,
        clock,
    }
}

pub fn station(id: &str) -> NewDevice {
    NewDevice {
        id: id.to_string(),
        label: format!("Wash bay {id}"),
        location: "Harbour Road".to_string(),
        terminal_id: Some(format!("T-{id}")),
    }
}

fn ensure_template_db() -> PathBuf {
    static TEMPLATE_PATH: OnceLock<PathBuf> = OnceLock::new();

    TEMPLATE_PATH
        .get_or_init(|| {
            let template_path = std::env::var("TEST_DB_TEMPLATE_PATH")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(default_template_path);

            if let Some(parent) = template_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).expect("template parent dir should be creatable");
            }

            let mut connection = open_connection(template_path.to_string_lossy().as_ref())
                .expect("template db opens");
            run_migrations(&mut connection).expect("template migrations should succeed");

            template_path
        })
        .clone()
}

fn default_template_path() -> PathBuf {
    Path::new("./target/testdb/template.sqlite").to_path_buf()
}

fn unique_test_db_path(test_name: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let counter = TEST_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    Path::new("./target/testdb")
        .join(format!("{test_name}-{now}-{counter}.sqlite"))
        .to_path_buf()
}
