use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::{
    Alert, AlertMetadata, AlertType, AuditEvent, Device, DeviceStatus, FaultRecord,
    MaintenanceInfo, NewAlert, NewAuditEvent, NewDevice, Weather,
};
use crate::domain::uptime::OfflineInterval;

pub const LATEST_SCHEMA_VERSION: u32 = 2;

pub const GLOBAL_SCOPE: &str = "global";

const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        r#"
CREATE TABLE IF NOT EXISTS devices (
    id TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    location TEXT NOT NULL,
    terminal_id TEXT,
    status TEXT NOT NULL,
    last_heartbeat_at TEXT,
    last_txn_at TEXT,
    last_status_change_at TEXT,
    uptime_daily REAL NOT NULL DEFAULT 100,
    uptime_weekly REAL NOT NULL DEFAULT 100,
    alerts_open INTEGER NOT NULL DEFAULT 0,
    maintenance_json TEXT,
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    device_id TEXT NOT NULL,
    alert_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL,
    resolved INTEGER NOT NULL DEFAULT 0,
    resolved_at TEXT,
    dashboard_only INTEGER NOT NULL DEFAULT 0,
    metadata_json TEXT NOT NULL DEFAULT '{}'
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_open_device_type
ON alerts (device_id, alert_type) WHERE resolved = 0;

CREATE INDEX IF NOT EXISTS idx_alerts_device_created_at
ON alerts (device_id, created_at DESC);

CREATE TABLE IF NOT EXISTS audit_events (
    id TEXT PRIMARY KEY,
    device_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    kind TEXT NOT NULL,
    previous_status TEXT,
    new_status TEXT,
    reason TEXT NOT NULL,
    thresholds_json TEXT,
    suppression_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_events_device_created_at
ON audit_events (device_id, created_at DESC);

CREATE TABLE IF NOT EXISTS faults (
    id TEXT PRIMARY KEY,
    device_id TEXT NOT NULL,
    code TEXT NOT NULL,
    description TEXT NOT NULL,
    created_at TEXT NOT NULL,
    resolved INTEGER NOT NULL DEFAULT 0,
    resolved_by TEXT,
    resolved_at TEXT,
    notes TEXT
);

CREATE INDEX IF NOT EXISTS idx_faults_device_resolved
ON faults (device_id, resolved);
"#,
    ),
    (
        2,
        r#"
CREATE TABLE IF NOT EXISTS config_entries (
    key TEXT PRIMARY KEY,
    value_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS device_config (
    device_id TEXT PRIMARY KEY,
    override_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS weather (
    scope TEXT PRIMARY KEY,
    temperature_c REAL,
    precipitation INTEGER NOT NULL DEFAULT 0,
    observed_at TEXT NOT NULL
);
"#,
    ),
];

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode json column: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
}

pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    let connection = Connection::open(path)?;
    connection.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(connection)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), DbError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

pub fn format_ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|value| value.with_timezone(&Utc))
}

fn conversion_error<E>(index: usize, error: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
}

fn ts_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    parse_ts(&raw).map_err(|error| conversion_error(index, error))
}

fn opt_ts_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(index)?;
    raw.map(|value| parse_ts(&value).map_err(|error| conversion_error(index, error)))
        .transpose()
}

fn parsed_column<T>(row: &Row<'_>, index: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(index)?;
    raw.parse::<T>()
        .map_err(|error| conversion_error(index, error))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, index: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw).map_err(|error| conversion_error(index, error))
}

fn opt_json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    index: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(index)?;
    raw.map(|value| serde_json::from_str(&value).map_err(|error| conversion_error(index, error)))
        .transpose()
}

// ---------------------------------------------------------------- devices

const DEVICE_COLUMNS: &str = "id, label, location, terminal_id, status, last_heartbeat_at, \
     last_txn_at, last_status_change_at, uptime_daily, uptime_weekly, alerts_open, \
     maintenance_json, version";

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        label: row.get(1)?,
        location: row.get(2)?,
        terminal_id: row.get(3)?,
        status: parsed_column(row, 4)?,
        last_heartbeat_at: opt_ts_column(row, 5)?,
        last_txn_at: opt_ts_column(row, 6)?,
        last_status_change_at: opt_ts_column(row, 7)?,
        uptime_daily: row.get(8)?,
        uptime_weekly: row.get(9)?,
        alerts_open: row.get(10)?,
        maintenance: opt_json_column(row, 11)?,
        version: row.get(12)?,
    })
}

/// Inserts a device or refreshes its descriptive fields. Telemetry and status
/// of an existing device are left untouched; a new device starts offline.
pub fn upsert_device(
    connection: &Connection,
    device: &NewDevice,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO devices (id, label, location, terminal_id, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             label = excluded.label,
             location = excluded.location,
             terminal_id = excluded.terminal_id",
        params![
            device.id,
            device.label,
            device.location,
            device.terminal_id,
            DeviceStatus::Offline.as_str(),
            format_ts(now),
        ],
    )?;
    Ok(())
}

pub fn get_device(connection: &Connection, device_id: &str) -> Result<Option<Device>, DbError> {
    let device = connection
        .query_row(
            &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1"),
            params![device_id],
            device_from_row,
        )
        .optional()?;
    Ok(device)
}

pub fn list_devices(connection: &Connection) -> Result<Vec<Device>, DbError> {
    let mut statement =
        connection.prepare(&format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY id"))?;
    let rows = statement.query_map([], device_from_row)?;

    let mut devices = Vec::new();
    for row in rows {
        devices.push(row?);
    }
    Ok(devices)
}

pub fn list_device_ids(connection: &Connection) -> Result<Vec<String>, DbError> {
    let mut statement = connection.prepare("SELECT id FROM devices ORDER BY id")?;
    let rows = statement.query_map([], |row| row.get(0))?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

/// Records an observed heartbeat. Stored timestamps only ever move forward so
/// a late, out-of-order observation cannot make a device look older.
pub fn record_heartbeat(
    connection: &Connection,
    device_id: &str,
    at: DateTime<Utc>,
    is_transaction: bool,
) -> Result<bool, DbError> {
    let at = format_ts(at);
    let updated = connection.execute(
        "UPDATE devices SET
             last_heartbeat_at = CASE
                 WHEN last_heartbeat_at IS NULL OR last_heartbeat_at < ?2 THEN ?2
                 ELSE last_heartbeat_at END,
             last_txn_at = CASE
                 WHEN ?3 = 0 THEN last_txn_at
                 WHEN last_txn_at IS NULL OR last_txn_at < ?2 THEN ?2
                 ELSE last_txn_at END
         WHERE id = ?1",
        params![device_id, at, is_transaction],
    )?;
    Ok(updated == 1)
}

/// Conditional status write. Returns `false` when the stored version no longer
/// matches `expected_version`.
pub fn update_device_status(
    connection: &Connection,
    device_id: &str,
    status: DeviceStatus,
    at: DateTime<Utc>,
    expected_version: i64,
) -> Result<bool, DbError> {
    let updated = connection.execute(
        "UPDATE devices
         SET status = ?2, last_status_change_at = ?3, version = version + 1
         WHERE id = ?1 AND version = ?4",
        params![device_id, status.as_str(), format_ts(at), expected_version],
    )?;
    Ok(updated == 1)
}

pub fn set_device_maintenance(
    connection: &Connection,
    device_id: &str,
    maintenance: Option<&MaintenanceInfo>,
) -> Result<bool, DbError> {
    let encoded = maintenance.map(serde_json::to_string).transpose()?;
    let updated = connection.execute(
        "UPDATE devices SET maintenance_json = ?2 WHERE id = ?1",
        params![device_id, encoded],
    )?;
    Ok(updated == 1)
}

pub fn set_device_uptime(
    connection: &Connection,
    device_id: &str,
    daily: f64,
    weekly: f64,
) -> Result<(), DbError> {
    connection.execute(
        "UPDATE devices SET uptime_daily = ?2, uptime_weekly = ?3 WHERE id = ?1",
        params![device_id, daily, weekly],
    )?;
    Ok(())
}

/// Re-derives `alerts_open` from the alerts table and returns the new value.
pub fn refresh_alerts_open(connection: &Connection, device_id: &str) -> Result<u32, DbError> {
    connection.execute(
        "UPDATE devices
         SET alerts_open = (SELECT COUNT(*) FROM alerts WHERE device_id = ?1 AND resolved = 0)
         WHERE id = ?1",
        params![device_id],
    )?;
    let count = connection
        .query_row(
            "SELECT alerts_open FROM devices WHERE id = ?1",
            params![device_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(count.unwrap_or(0))
}

/// Drops every alert, audit event, fault, weather reading and config override
/// of a device and clears its telemetry, leaving a registered but blank device.
pub fn reset_device(
    connection: &Connection,
    device_id: &str,
    status: DeviceStatus,
) -> Result<(), DbError> {
    connection.execute("DELETE FROM alerts WHERE device_id = ?1", params![device_id])?;
    connection.execute(
        "DELETE FROM audit_events WHERE device_id = ?1",
        params![device_id],
    )?;
    connection.execute("DELETE FROM faults WHERE device_id = ?1", params![device_id])?;
    connection.execute("DELETE FROM weather WHERE scope = ?1", params![device_id])?;
    connection.execute(
        "DELETE FROM device_config WHERE device_id = ?1",
        params![device_id],
    )?;
    connection.execute(
        "UPDATE devices SET
             status = ?2,
             last_heartbeat_at = NULL,
             last_txn_at = NULL,
             last_status_change_at = NULL,
             uptime_daily = 100,
             uptime_weekly = 100,
             alerts_open = 0,
             maintenance_json = NULL
         WHERE id = ?1",
        params![device_id, status.as_str()],
    )?;
    Ok(())
}

pub fn delete_device(connection: &Connection, device_id: &str) -> Result<bool, DbError> {
    reset_device(connection, device_id, DeviceStatus::Offline)?;
    let deleted = connection.execute("DELETE FROM devices WHERE id = ?1", params![device_id])?;
    Ok(deleted == 1)
}

// ----------------------------------------------------------------- alerts

const ALERT_COLUMNS: &str = "id, device_id, alert_type, severity, message, created_at, resolved, \
     resolved_at, dashboard_only, metadata_json";

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: row.get(0)?,
        device_id: row.get(1)?,
        alert_type: parsed_column(row, 2)?,
        severity: parsed_column(row, 3)?,
        message: row.get(4)?,
        created_at: ts_column(row, 5)?,
        resolved: row.get(6)?,
        resolved_at: opt_ts_column(row, 7)?,
        dashboard_only: row.get(8)?,
        metadata: json_column(row, 9)?,
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertFilter {
    pub device_id: Option<String>,
    pub alert_type: Option<AlertType>,
    pub open_only: bool,
    pub limit: Option<u32>,
}

pub fn insert_alert(
    connection: &Connection,
    new_alert: &NewAlert,
    now: DateTime<Utc>,
) -> Result<Alert, DbError> {
    let alert = Alert {
        id: Uuid::new_v4().to_string(),
        device_id: new_alert.device_id.clone(),
        alert_type: new_alert.alert_type,
        severity: new_alert.severity,
        message: new_alert.message.clone(),
        created_at: now,
        resolved: false,
        resolved_at: None,
        dashboard_only: new_alert.dashboard_only,
        metadata: new_alert.metadata.clone(),
    };

    connection.execute(
        "INSERT INTO alerts
             (id, device_id, alert_type, severity, message, created_at, resolved, dashboard_only, metadata_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)",
        params![
            alert.id,
            alert.device_id,
            alert.alert_type.as_str(),
            alert.severity.as_str(),
            alert.message,
            format_ts(alert.created_at),
            alert.dashboard_only,
            serde_json::to_string(&alert.metadata)?,
        ],
    )?;

    Ok(alert)
}

pub fn get_alert(connection: &Connection, alert_id: &str) -> Result<Option<Alert>, DbError> {
    let alert = connection
        .query_row(
            &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"),
            params![alert_id],
            alert_from_row,
        )
        .optional()?;
    Ok(alert)
}

pub fn find_open_alert(
    connection: &Connection,
    device_id: &str,
    alert_type: AlertType,
) -> Result<Option<Alert>, DbError> {
    let alert = connection
        .query_row(
            &format!(
                "SELECT {ALERT_COLUMNS} FROM alerts
                 WHERE device_id = ?1 AND alert_type = ?2 AND resolved = 0"
            ),
            params![device_id, alert_type.as_str()],
            alert_from_row,
        )
        .optional()?;
    Ok(alert)
}

pub fn list_alerts(connection: &Connection, filter: &AlertFilter) -> Result<Vec<Alert>, DbError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {ALERT_COLUMNS} FROM alerts
         WHERE (?1 IS NULL OR device_id = ?1)
           AND (?2 IS NULL OR alert_type = ?2)
           AND (?3 = 0 OR resolved = 0)
         ORDER BY created_at DESC, id DESC
         LIMIT ?4"
    ))?;

    let limit = filter.limit.map_or(-1, i64::from);
    let rows = statement.query_map(
        params![
            filter.device_id,
            filter.alert_type.map(AlertType::as_str),
            filter.open_only,
            limit
        ],
        alert_from_row,
    )?;

    let mut alerts = Vec::new();
    for row in rows {
        alerts.push(row?);
    }
    Ok(alerts)
}

/// Returns `false` if the alert does not exist or was already resolved.
pub fn mark_alert_resolved(
    connection: &Connection,
    alert_id: &str,
    at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let updated = connection.execute(
        "UPDATE alerts SET resolved = 1, resolved_at = ?2 WHERE id = ?1 AND resolved = 0",
        params![alert_id, format_ts(at)],
    )?;
    Ok(updated == 1)
}

pub fn update_alert_metadata(
    connection: &Connection,
    alert_id: &str,
    metadata: &AlertMetadata,
) -> Result<(), DbError> {
    connection.execute(
        "UPDATE alerts SET metadata_json = ?2 WHERE id = ?1",
        params![alert_id, serde_json::to_string(metadata)?],
    )?;
    Ok(())
}

/// Offline alerts that were still open at or after `since`.
pub fn list_offline_intervals(
    connection: &Connection,
    device_id: &str,
    since: DateTime<Utc>,
) -> Result<Vec<OfflineInterval>, DbError> {
    let mut statement = connection.prepare(
        "SELECT created_at, resolved_at FROM alerts
         WHERE device_id = ?1
           AND alert_type = ?2
           AND (resolved_at IS NULL OR resolved_at >= ?3)
         ORDER BY created_at",
    )?;
    let rows = statement.query_map(
        params![device_id, AlertType::Offline.as_str(), format_ts(since)],
        |row| {
            Ok(OfflineInterval {
                started_at: ts_column(row, 0)?,
                ended_at: opt_ts_column(row, 1)?,
            })
        },
    )?;

    let mut intervals = Vec::new();
    for row in rows {
        intervals.push(row?);
    }
    Ok(intervals)
}

// ----------------------------------------------------------- audit events

fn audit_event_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
    let previous_status: Option<String> = row.get(4)?;
    let new_status: Option<String> = row.get(5)?;
    Ok(AuditEvent {
        id: row.get(0)?,
        device_id: row.get(1)?,
        created_at: ts_column(row, 2)?,
        kind: parsed_column(row, 3)?,
        previous_status: previous_status
            .map(|value| value.parse::<DeviceStatus>())
            .transpose()
            .map_err(|error| conversion_error(4, error))?,
        new_status: new_status
            .map(|value| value.parse::<DeviceStatus>())
            .transpose()
            .map_err(|error| conversion_error(5, error))?,
        reason: row.get(6)?,
        thresholds: opt_json_column(row, 7)?,
        suppression: json_column(row, 8)?,
    })
}

pub fn insert_audit_event(
    connection: &Connection,
    event: &NewAuditEvent,
) -> Result<String, DbError> {
    let id = Uuid::new_v4().to_string();
    let thresholds = event
        .thresholds
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    connection.execute(
        "INSERT INTO audit_events
             (id, device_id, created_at, kind, previous_status, new_status, reason, thresholds_json, suppression_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            event.device_id,
            format_ts(event.created_at),
            event.kind.as_str(),
            event.previous_status.map(DeviceStatus::as_str),
            event.new_status.map(DeviceStatus::as_str),
            event.reason,
            thresholds,
            serde_json::to_string(&event.suppression)?,
        ],
    )?;

    Ok(id)
}

pub fn list_audit_events(
    connection: &Connection,
    device_id: &str,
    limit: u32,
) -> Result<Vec<AuditEvent>, DbError> {
    // rowid breaks ties between events written in the same millisecond.
    let mut statement = connection.prepare(
        "SELECT id, device_id, created_at, kind, previous_status, new_status, reason,
                thresholds_json, suppression_json
         FROM audit_events
         WHERE device_id = ?1
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2",
    )?;
    let rows = statement.query_map(params![device_id, i64::from(limit)], audit_event_from_row)?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

// ----------------------------------------------------------------- faults

const FAULT_COLUMNS: &str =
    "id, device_id, code, description, created_at, resolved, resolved_by, resolved_at, notes";

fn fault_from_row(row: &Row<'_>) -> rusqlite::Result<FaultRecord> {
    Ok(FaultRecord {
        id: row.get(0)?,
        device_id: row.get(1)?,
        code: row.get(2)?,
        description: row.get(3)?,
        created_at: ts_column(row, 4)?,
        resolved: row.get(5)?,
        resolved_by: row.get(6)?,
        resolved_at: opt_ts_column(row, 7)?,
        notes: row.get(8)?,
    })
}

pub fn insert_fault(
    connection: &Connection,
    device_id: &str,
    code: &str,
    description: &str,
    now: DateTime<Utc>,
) -> Result<FaultRecord, DbError> {
    let fault = FaultRecord {
        id: Uuid::new_v4().to_string(),
        device_id: device_id.to_string(),
        code: code.to_string(),
        description: description.to_string(),
        created_at: now,
        resolved: false,
        resolved_by: None,
        resolved_at: None,
        notes: None,
    };

    connection.execute(
        "INSERT INTO faults (id, device_id, code, description, created_at, resolved)
         VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        params![
            fault.id,
            fault.device_id,
            fault.code,
            fault.description,
            format_ts(fault.created_at),
        ],
    )?;

    Ok(fault)
}

pub fn get_fault(connection: &Connection, fault_id: &str) -> Result<Option<FaultRecord>, DbError> {
    let fault = connection
        .query_row(
            &format!("SELECT {FAULT_COLUMNS} FROM faults WHERE id = ?1"),
            params![fault_id],
            fault_from_row,
        )
        .optional()?;
    Ok(fault)
}

pub fn list_faults(
    connection: &Connection,
    device_id: &str,
    open_only: bool,
) -> Result<Vec<FaultRecord>, DbError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {FAULT_COLUMNS} FROM faults
         WHERE device_id = ?1 AND (?2 = 0 OR resolved = 0)
         ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = statement.query_map(params![device_id, open_only], fault_from_row)?;

    let mut faults = Vec::new();
    for row in rows {
        faults.push(row?);
    }
    Ok(faults)
}

pub fn count_open_faults(connection: &Connection, device_id: &str) -> Result<i64, DbError> {
    let count = connection.query_row(
        "SELECT COUNT(*) FROM faults WHERE device_id = ?1 AND resolved = 0",
        params![device_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn mark_fault_resolved(
    connection: &Connection,
    fault_id: &str,
    resolved_by: &str,
    notes: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let updated = connection.execute(
        "UPDATE faults SET resolved = 1, resolved_by = ?2, notes = ?3, resolved_at = ?4
         WHERE id = ?1 AND resolved = 0",
        params![fault_id, resolved_by, notes, format_ts(at)],
    )?;
    Ok(updated == 1)
}

// ------------------------------------------------------- config & weather

pub fn get_config_entry(connection: &Connection, key: &str) -> Result<Option<String>, DbError> {
    let value = connection
        .query_row(
            "SELECT value_json FROM config_entries WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn put_config_entry(
    connection: &Connection,
    key: &str,
    value_json: &str,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO config_entries (key, value_json, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
        params![key, value_json, format_ts(now)],
    )?;
    Ok(())
}

pub fn get_device_override(
    connection: &Connection,
    device_id: &str,
) -> Result<Option<String>, DbError> {
    let value = connection
        .query_row(
            "SELECT override_json FROM device_config WHERE device_id = ?1",
            params![device_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn put_device_override(
    connection: &Connection,
    device_id: &str,
    override_json: &str,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO device_config (device_id, override_json, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(device_id) DO UPDATE SET
             override_json = excluded.override_json, updated_at = excluded.updated_at",
        params![device_id, override_json, format_ts(now)],
    )?;
    Ok(())
}

pub fn get_weather(connection: &Connection, scope: &str) -> Result<Option<Weather>, DbError> {
    let weather = connection
        .query_row(
            "SELECT temperature_c, precipitation, observed_at FROM weather WHERE scope = ?1",
            params![scope],
            |row| {
                Ok(Weather {
                    temperature_c: row.get(0)?,
                    precipitation: row.get(1)?,
                    observed_at: ts_column(row, 2)?,
                })
            },
        )
        .optional()?;
    Ok(weather)
}

pub fn put_weather(connection: &Connection, scope: &str, weather: &Weather) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO weather (scope, temperature_c, precipitation, observed_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(scope) DO UPDATE SET
             temperature_c = excluded.temperature_c,
             precipitation = excluded.precipitation,
             observed_at = excluded.observed_at",
        params![
            scope,
            weather.temperature_c,
            weather.precipitation,
            format_ts(weather.observed_at),
        ],
    )?;
    Ok(())
}
