pub mod alerts;
pub mod config_provider;
pub mod faults;
pub mod harness;
mod locks;
pub mod notifications;
pub mod uptime;

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

use crate::adapters::db::{self, AlertFilter, DbError, GLOBAL_SCOPE};
use crate::adapters::notify::Notifier;
use crate::app::services::{ServiceError, SqliteStore, StationQueryHandler};
use crate::domain::clock::Clock;
use crate::domain::models::{
    Alert, AlertType, AuditEvent, AuditEventKind, Device, DeviceStatus, HeartbeatSource,
    NewAlert, NewAuditEvent, NewDevice, Severity, Weather,
};
use crate::domain::monitoring_config::{ConfigError, MonitoringConfig, MonitoringConfigOverride};
use crate::domain::status::{StatusDecision, StatusInputs, evaluate_status};

use self::config_provider::{ConfigProvider, DEFAULT_CACHE_TTL};
use self::locks::DeviceLocks;
use self::notifications::{Notice, NotificationDispatcher};

pub const DEFAULT_SWEEP_WORKERS: usize = 4;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("alert not found: {0}")]
    AlertNotFound(String),
    #[error("fault not found: {0}")]
    FaultNotFound(String),
    #[error("device {0} changed while it was being evaluated")]
    ConcurrentUpdate(String),
    #[error("a sweep is already running")]
    SweepAlreadyRunning,
    #[error("invalid monitoring config: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Store(#[from] ServiceError),
}

impl MonitorError {
    pub fn invalid_input(message: impl Display) -> Self {
        Self::InvalidInput(message.to_string())
    }
}

impl From<DbError> for MonitorError {
    fn from(error: DbError) -> Self {
        Self::Store(ServiceError::Database(error))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub config_cache_ttl: Duration,
    pub sweep_workers: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            config_cache_ttl: DEFAULT_CACHE_TTL,
            sweep_workers: DEFAULT_SWEEP_WORKERS,
        }
    }
}

/// What one evaluation decided and did.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub device_id: String,
    pub previous: DeviceStatus,
    pub decision: StatusDecision,
    pub changed: bool,
    pub alert_raised: Option<Alert>,
    pub alerts_resolved: Vec<Alert>,
    pub offline_notified: bool,
    pub recovery_notified: bool,
}

impl EvaluationOutcome {
    pub fn status(&self) -> DeviceStatus {
        self.decision.status
    }
}

/// A committed transition plus the notifications it still owes.
pub(crate) struct Transition {
    pub(crate) outcome: EvaluationOutcome,
    pub(crate) notices: Vec<Notice>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub devices: usize,
    pub evaluated: usize,
    pub changed: usize,
    pub failed: usize,
    pub reminders_sent: usize,
    pub reminders_failed: usize,
    pub uptime_refreshed: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct SweepTally {
    evaluated: usize,
    changed: usize,
    failed: usize,
}

struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The monitoring engine: owns the store handle, the config cache, the
/// notification sink and the per-device locks.
pub struct Monitor {
    store: SqliteStore,
    config: ConfigProvider,
    dispatcher: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    locks: DeviceLocks,
    sweep_running: AtomicBool,
    sweep_workers: usize,
}

impl Monitor {
    pub fn new(
        store: SqliteStore,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            config: ConfigProvider::new(store.clone(), settings.config_cache_ttl),
            dispatcher: NotificationDispatcher::new(store.clone(), notifier),
            store,
            clock,
            locks: DeviceLocks::default(),
            sweep_running: AtomicBool::new(false),
            sweep_workers: settings.sweep_workers.max(1),
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn config(&self) -> &ConfigProvider {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ------------------------------------------------------------ devices

    pub fn register_device(&self, device: &NewDevice) -> Result<Device, MonitorError> {
        if device.id.trim().is_empty() {
            return Err(MonitorError::invalid_input("device id must not be empty"));
        }
        let now = self.now();
        let registered = self.store.with_transaction(|tx| {
            db::upsert_device(tx, device, now)?;
            require_device(tx, &device.id)
        })?;
        tracing::info!(device_id = %device.id, "device registered");
        Ok(registered)
    }

    pub fn get_device(&self, device_id: &str) -> Result<Device, MonitorError> {
        self.store
            .get_device(device_id)?
            .ok_or_else(|| MonitorError::DeviceNotFound(device_id.to_string()))
    }

    pub fn list_devices(&self) -> Result<Vec<Device>, MonitorError> {
        Ok(self.store.list_devices()?)
    }

    // ---------------------------------------------------------- telemetry

    pub fn ingest_heartbeat(
        &self,
        device_id: &str,
        source: HeartbeatSource,
    ) -> Result<EvaluationOutcome, MonitorError> {
        self.ingest_heartbeat_at(device_id, source, self.now())
    }

    /// Records a heartbeat observed at `at` and evaluates the device.
    pub fn ingest_heartbeat_at(
        &self,
        device_id: &str,
        source: HeartbeatSource,
        at: DateTime<Utc>,
    ) -> Result<EvaluationOutcome, MonitorError> {
        let now = self.now();
        tracing::debug!(device_id, source = source.as_str(), at = %at, "heartbeat received");

        let ((), outcome) = self.locked_transition(device_id, now, |tx, config| {
            let is_transaction = source == HeartbeatSource::Transaction;
            if !db::record_heartbeat(tx, device_id, at, is_transaction)? {
                return Err(MonitorError::DeviceNotFound(device_id.to_string()));
            }
            Ok(((), apply_transition(tx, device_id, config, now)?))
        })?;
        Ok(outcome)
    }

    // --------------------------------------------------------- evaluation

    pub fn evaluate(&self, device_id: &str) -> Result<EvaluationOutcome, MonitorError> {
        self.evaluate_at(device_id, self.now())
    }

    pub fn evaluate_at(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<EvaluationOutcome, MonitorError> {
        let ((), outcome) = self.locked_transition(device_id, now, |tx, config| {
            Ok(((), apply_transition(tx, device_id, config, now)?))
        })?;
        Ok(outcome)
    }

    /// Evaluates every device on a pool of worker threads, then sends due
    /// reminders and refreshes stored uptime. Only one sweep runs at a time.
    pub fn sweep(&self) -> Result<SweepReport, MonitorError> {
        if self
            .sweep_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(MonitorError::SweepAlreadyRunning);
        }
        let _guard = SweepGuard(&self.sweep_running);

        let now = self.now();
        let device_ids = self
            .store
            .with_connection(|connection| db::list_device_ids(connection).map_err(MonitorError::from))?;

        let chunk_size = device_ids.len().div_ceil(self.sweep_workers).max(1);
        let tallies: Vec<SweepTally> = thread::scope(|scope| {
            let handles: Vec<_> = device_ids
                .chunks(chunk_size)
                .map(|chunk| scope.spawn(move || self.sweep_chunk(chunk, now)))
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        tracing::error!("sweep worker panicked");
                        SweepTally::default()
                    })
                })
                .collect()
        });

        let mut report = SweepReport {
            devices: device_ids.len(),
            ..SweepReport::default()
        };
        for tally in tallies {
            report.changed += tally.changed;
            report.evaluated += tally.evaluated;
            report.failed += tally.failed;
        }

        match self
            .dispatcher
            .send_reminders(now, |device_id| self.config.get(device_id))
        {
            Ok(reminders) => {
                report.reminders_sent = reminders.sent;
                report.reminders_failed = reminders.failed;
            }
            Err(error) => tracing::warn!(error = %error, "reminder sweep failed"),
        }

        for device_id in &device_ids {
            match self.refresh_uptime(device_id) {
                Ok(true) => report.uptime_refreshed += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(device_id = %device_id, error = %error, "uptime refresh failed")
                }
            }
        }

        tracing::info!(
            devices = report.devices,
            evaluated = report.evaluated,
            changed = report.changed,
            failed = report.failed,
            reminders_sent = report.reminders_sent,
            reminders_failed = report.reminders_failed,
            "sweep finished"
        );
        Ok(report)
    }

    fn sweep_chunk(&self, device_ids: &[String], now: DateTime<Utc>) -> SweepTally {
        let mut tally = SweepTally::default();
        for device_id in device_ids {
            match self.evaluate_at(device_id, now) {
                Ok(outcome) => {
                    tally.evaluated += 1;
                    if outcome.changed {
                        tally.changed += 1;
                    }
                }
                // Removed after the id list was read.
                Err(MonitorError::DeviceNotFound(_)) => {}
                Err(error) => {
                    tally.failed += 1;
                    tracing::warn!(device_id = %device_id, error = %error, "device evaluation failed");
                }
            }
        }
        tally
    }

    // ------------------------------------------------------------ weather

    /// Stores a weather reading for one device, or the global fallback when
    /// `device_id` is `None`.
    pub fn set_weather(&self, device_id: Option<&str>, weather: &Weather) -> Result<(), MonitorError> {
        self.store.with_transaction(|tx| {
            let scope = match device_id {
                Some(device_id) => {
                    require_device(tx, device_id)?;
                    device_id
                }
                None => GLOBAL_SCOPE,
            };
            db::put_weather(tx, scope, weather)?;
            Ok::<_, MonitorError>(())
        })?;
        tracing::info!(
            scope = device_id.unwrap_or(GLOBAL_SCOPE),
            temperature_c = weather.temperature_c,
            precipitation = weather.precipitation,
            "weather updated"
        );
        Ok(())
    }

    // ------------------------------------------------------------- config

    pub fn monitoring_config(&self) -> MonitoringConfig {
        self.config.global()
    }

    pub fn effective_config(&self, device_id: &str) -> MonitoringConfig {
        self.config.get(device_id)
    }

    pub fn set_monitoring_config(&self, config: &MonitoringConfig) -> Result<(), MonitorError> {
        self.config.set_global(config, self.now())
    }

    pub fn set_device_override(
        &self,
        device_id: &str,
        overlay: &MonitoringConfigOverride,
    ) -> Result<(), MonitorError> {
        self.get_device(device_id)?;
        self.config.set_override(device_id, overlay, self.now())
    }

    // ------------------------------------------------------------- alerts

    /// Opens an alert raised outside status evaluation, such as a redemption
    /// error reported by the payment terminal.
    pub fn create_alert(&self, new_alert: &NewAlert) -> Result<Alert, MonitorError> {
        let now = self.now();
        let handle = self.locks.handle(&new_alert.device_id);
        let _guard = locks::lock(&handle);
        let created = self.store.with_transaction(|tx| {
            require_device(tx, &new_alert.device_id)?;
            Ok::<_, MonitorError>(alerts::create(tx, new_alert, now)?)
        })?;
        Ok(created.alert)
    }

    pub fn resolve_alert(&self, alert_id: &str) -> Result<Alert, MonitorError> {
        let alert = self.get_alert(alert_id)?;
        if alert.resolved {
            return Ok(alert);
        }

        let now = self.now();
        let handle = self.locks.handle(&alert.device_id);
        let _guard = locks::lock(&handle);
        let resolved = self.store.with_transaction(|tx| {
            Ok::<_, MonitorError>(alerts::resolve(tx, alert_id, now, "resolved by operator")?)
        })?;

        match resolved {
            Some(resolved) => Ok(resolved),
            None => self.get_alert(alert_id),
        }
    }

    pub fn acknowledge_alerts(
        &self,
        device_id: &str,
        types: Option<&[AlertType]>,
    ) -> Result<Vec<Alert>, MonitorError> {
        let now = self.now();
        let handle = self.locks.handle(device_id);
        let _guard = locks::lock(&handle);
        let acknowledged = self.store.with_transaction(|tx| {
            require_device(tx, device_id)?;
            Ok::<_, MonitorError>(alerts::acknowledge(tx, device_id, types, now)?)
        })?;
        tracing::info!(device_id, count = acknowledged.len(), "alerts acknowledged");
        Ok(acknowledged)
    }

    pub fn get_alert(&self, alert_id: &str) -> Result<Alert, MonitorError> {
        self.store
            .get_alert(alert_id)?
            .ok_or_else(|| MonitorError::AlertNotFound(alert_id.to_string()))
    }

    pub fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, MonitorError> {
        Ok(self.store.list_alerts(filter)?)
    }

    pub fn list_audit_events(
        &self,
        device_id: &str,
        limit: u32,
    ) -> Result<Vec<AuditEvent>, MonitorError> {
        self.get_device(device_id)?;
        Ok(self.store.list_audit_events(device_id, limit)?)
    }

    // ------------------------------------------------------------ helpers

    /// Runs `op` in one transaction while holding the device's lock, then
    /// dispatches the notifications the transition owes once both are
    /// released.
    pub(crate) fn locked_transition<T>(
        &self,
        device_id: &str,
        now: DateTime<Utc>,
        op: impl FnOnce(&Connection, &MonitoringConfig) -> Result<(T, Transition), MonitorError>,
    ) -> Result<(T, EvaluationOutcome), MonitorError> {
        let config = self.config.get(device_id);

        let (value, transition) = {
            let handle = self.locks.handle(device_id);
            let _guard = locks::lock(&handle);
            self.store.with_transaction(|tx| op(tx, &config))?
        };

        Ok((value, self.deliver(transition, &config, now)))
    }

    fn deliver(
        &self,
        transition: Transition,
        config: &MonitoringConfig,
        now: DateTime<Utc>,
    ) -> EvaluationOutcome {
        let Transition {
            mut outcome,
            notices,
        } = transition;

        for notice in &notices {
            let delivered = self.dispatcher.dispatch(notice, config, now);
            match notice {
                Notice::Offline(_) => outcome.offline_notified = delivered,
                Notice::Recovery(_) => outcome.recovery_notified = delivered,
            }
        }
        outcome
    }
}

pub(crate) fn require_device(connection: &Connection, device_id: &str) -> Result<Device, MonitorError> {
    db::get_device(connection, device_id)?
        .ok_or_else(|| MonitorError::DeviceNotFound(device_id.to_string()))
}

/// Evaluates a device and, when its status changes, persists the new status
/// together with its audit event and alert side effects. Must run inside the
/// caller's transaction while the device lock is held.
pub(crate) fn apply_transition(
    connection: &Connection,
    device_id: &str,
    config: &MonitoringConfig,
    now: DateTime<Utc>,
) -> Result<Transition, MonitorError> {
    let device = require_device(connection, device_id)?;
    let weather = match db::get_weather(connection, device_id)? {
        Some(weather) => Some(weather),
        None => db::get_weather(connection, GLOBAL_SCOPE)?,
    };
    let active_fault = db::count_open_faults(connection, device_id)? > 0;

    let decision = evaluate_status(
        &StatusInputs {
            last_heartbeat_at: device.last_heartbeat_at,
            last_txn_at: device.last_txn_at,
            maintenance_reason: device.maintenance.as_ref().map(|info| info.reason.as_str()),
            active_fault,
            weather: weather.as_ref(),
        },
        config,
        now,
    );

    let mut outcome = EvaluationOutcome {
        device_id: device_id.to_string(),
        previous: device.status,
        decision: decision.clone(),
        changed: false,
        alert_raised: None,
        alerts_resolved: Vec::new(),
        offline_notified: false,
        recovery_notified: false,
    };
    let mut notices = Vec::new();

    if decision.status == device.status {
        return Ok(Transition { outcome, notices });
    }

    if !db::update_device_status(connection, device_id, decision.status, now, device.version)? {
        return Err(MonitorError::ConcurrentUpdate(device_id.to_string()));
    }
    outcome.changed = true;

    db::insert_audit_event(
        connection,
        &NewAuditEvent {
            device_id: device_id.to_string(),
            created_at: now,
            kind: AuditEventKind::StatusChange,
            previous_status: Some(device.status),
            new_status: Some(decision.status),
            reason: decision.reason.clone(),
            thresholds: Some(decision.thresholds.clone()),
            suppression: decision.suppression,
        },
    )?;

    tracing::info!(
        device_id,
        from = %device.status,
        to = %decision.status,
        reason = %decision.reason,
        "device status changed"
    );

    if decision.status == DeviceStatus::Maintenance {
        outcome.alerts_resolved =
            alerts::auto_resolve_all(connection, device_id, now, "device entered maintenance")?;
        return Ok(Transition { outcome, notices });
    }

    match device.status {
        DeviceStatus::Offline => {
            // A fault outranks offline without proving the device is reporting.
            let reporting = decision.status.is_heartbeat_derived();
            let reason = if reporting {
                "heartbeat restored"
            } else {
                "superseded by hardware fault"
            };
            if let Some(resolved) =
                alerts::resolve_open(connection, device_id, AlertType::Offline, now, reason)?
            {
                if reporting && config.notify_on_recovery {
                    notices.push(Notice::Recovery(resolved.clone()));
                }
                outcome.alerts_resolved.push(resolved);
            }
        }
        DeviceStatus::WarningLowActivity => {
            if let Some(resolved) = alerts::resolve_open(
                connection,
                device_id,
                AlertType::LowActivityWarning,
                now,
                "activity resumed",
            )? {
                outcome.alerts_resolved.push(resolved);
            }
        }
        _ => {}
    }

    let raised = match decision.status {
        DeviceStatus::Offline => Some((AlertType::Offline, Severity::Critical, false)),
        DeviceStatus::WarningLowActivity => {
            Some((AlertType::LowActivityWarning, Severity::Warn, true))
        }
        DeviceStatus::Fault => Some((AlertType::HardwareFault, Severity::Critical, false)),
        _ => None,
    };

    if let Some((alert_type, severity, dashboard_only)) = raised {
        let created = alerts::create(
            connection,
            &NewAlert {
                device_id: device_id.to_string(),
                alert_type,
                severity,
                message: decision.reason.clone(),
                dashboard_only,
                metadata: Default::default(),
            },
            now,
        )?;

        if alert_type == AlertType::Offline
            && created.created
            && config.notify_on_first_offline
            && !created.alert.dashboard_only
        {
            notices.push(Notice::Offline(created.alert.clone()));
        }
        outcome.alert_raised = Some(created.alert);
    }

    Ok(Transition { outcome, notices })
}
