use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::adapters::db::{self, AlertFilter};
use crate::adapters::notify::{Notifier, NotifyError};
use crate::app::services::{ServiceError, SqliteStore};
use crate::domain::models::{Alert, AlertMetadata, AlertType, NewAlert, Severity};
use crate::domain::monitoring_config::{MonitoringConfig, minutes};
use crate::monitor::alerts;

/// A notification owed by a committed transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Offline(Alert),
    Recovery(Alert),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReminderReport {
    pub sent: usize,
    pub failed: usize,
}

/// Sends alert notifications and records the delivery outcome on the alert.
///
/// Nothing here fails the caller. A failed send is logged, flagged on the
/// alert so the next reminder sweep retries it, and surfaced as a
/// dashboard-only `notification-failure` alert until a send succeeds again.
pub struct NotificationDispatcher {
    store: SqliteStore,
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(store: SqliteStore, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Returns whether every recipient accepted the notification.
    pub fn dispatch(&self, notice: &Notice, config: &MonitoringConfig, now: DateTime<Utc>) -> bool {
        match notice {
            Notice::Offline(alert) => {
                if alert.dashboard_only {
                    return false;
                }
                let subject = format!("[offline] {}", alert.device_id);
                let result = self.deliver(&config.recipients, &subject, &alert.message);
                self.settle(&alert.device_id, Some(&alert.id), result, now, false)
            }
            Notice::Recovery(alert) => {
                let subject = format!("[recovered] {}", alert.device_id);
                let body = format!(
                    "{} is reporting again; offline since {}",
                    alert.device_id,
                    db::format_ts(alert.created_at)
                );
                let result = self.deliver(&config.recipients, &subject, &body);
                self.settle(&alert.device_id, None, result, now, false)
            }
        }
    }

    /// Re-sends notifications for open offline alerts whose reminder is due.
    pub fn send_reminders(
        &self,
        now: DateTime<Utc>,
        config_for: impl Fn(&str) -> MonitoringConfig,
    ) -> Result<ReminderReport, ServiceError> {
        let open = self.store.with_connection(|connection| {
            db::list_alerts(
                connection,
                &AlertFilter {
                    alert_type: Some(AlertType::Offline),
                    open_only: true,
                    ..AlertFilter::default()
                },
            )
            .map_err(ServiceError::from)
        })?;

        let mut report = ReminderReport::default();
        for alert in &open {
            let config = config_for(&alert.device_id);
            if !reminder_due(alert, &config, now) {
                continue;
            }

            let subject = format!("[reminder] {} still offline", alert.device_id);
            let body = format!(
                "{}; offline since {}",
                alert.message,
                db::format_ts(alert.created_at)
            );
            let result = self.deliver(&config.recipients, &subject, &body);
            if self.settle(&alert.device_id, Some(&alert.id), result, now, true) {
                report.sent += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.sent + report.failed > 0 {
            tracing::info!(sent = report.sent, failed = report.failed, "reminder sweep finished");
        }
        Ok(report)
    }

    fn deliver(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Err(NotifyError::Rejected("no recipients configured".to_string()));
        }
        for recipient in recipients {
            self.notifier.send(recipient, subject, body)?;
        }
        Ok(())
    }

    fn settle(
        &self,
        device_id: &str,
        alert_id: Option<&str>,
        result: Result<(), NotifyError>,
        now: DateTime<Utc>,
        reminder: bool,
    ) -> bool {
        let delivered = result.is_ok();
        if let Err(error) = &result {
            tracing::warn!(device_id, alert_id, error = %error, "notification delivery failed");
        }

        let recorded = self.store.with_transaction(|tx| -> Result<(), ServiceError> {
            if let Some(alert_id) = alert_id
                && let Some(alert) = db::get_alert(tx, alert_id)?
            {
                let metadata = delivery_metadata(alert.metadata, delivered, now, reminder);
                db::update_alert_metadata(tx, alert_id, &metadata)?;
            }

            match &result {
                Ok(()) => {
                    alerts::resolve_open(
                        tx,
                        device_id,
                        AlertType::NotificationFailure,
                        now,
                        "notification delivered",
                    )?;
                }
                Err(error) => {
                    alerts::create(
                        tx,
                        &NewAlert {
                            device_id: device_id.to_string(),
                            alert_type: AlertType::NotificationFailure,
                            severity: Severity::Warn,
                            message: format!("notification delivery failed: {error}"),
                            dashboard_only: true,
                            metadata: AlertMetadata::default(),
                        },
                        now,
                    )?;
                }
            }
            Ok(())
        });

        if let Err(error) = recorded {
            tracing::error!(device_id, error = %error, "failed to record notification outcome");
        }
        delivered
    }
}

/// An offline alert is due when its last attempt failed or the reminder
/// interval has passed since the last successful send (or its creation).
pub fn reminder_due(alert: &Alert, config: &MonitoringConfig, now: DateTime<Utc>) -> bool {
    if alert.resolved || alert.dashboard_only {
        return false;
    }
    if alert.metadata.last_attempt_failed {
        return true;
    }
    let since = alert.metadata.last_reminder_at.unwrap_or(alert.created_at);
    now - since >= minutes(config.reminder_interval_minutes)
}

fn delivery_metadata(
    mut metadata: AlertMetadata,
    delivered: bool,
    now: DateTime<Utc>,
    reminder: bool,
) -> AlertMetadata {
    if delivered {
        metadata.notified = true;
        metadata.last_attempt_failed = false;
        metadata.last_reminder_at = Some(now);
        if reminder {
            metadata.reminder_count += 1;
        }
    } else {
        metadata.last_attempt_failed = true;
    }
    metadata
}
