//! Alert lifecycle. Every function here runs against the caller's open
//! transaction, so the alert row, its audit event and the device's
//! `alerts_open` counter change together.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode};

use crate::adapters::db::{self, AlertFilter, DbError};
use crate::domain::models::{
    Alert, AlertType, AuditEventKind, NewAlert, NewAuditEvent, SuppressionFlags,
};

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedAlert {
    pub alert: Alert,
    /// `false` when an open alert of the same type already existed.
    pub created: bool,
}

/// Opens an alert unless one of the same type is already open for the device.
pub fn create(
    connection: &Connection,
    new_alert: &NewAlert,
    now: DateTime<Utc>,
) -> Result<CreatedAlert, DbError> {
    if let Some(existing) =
        db::find_open_alert(connection, &new_alert.device_id, new_alert.alert_type)?
    {
        return Ok(CreatedAlert {
            alert: existing,
            created: false,
        });
    }

    let alert = match db::insert_alert(connection, new_alert, now) {
        Ok(alert) => alert,
        Err(error) if is_unique_violation(&error) => {
            // Lost a race on idx_alerts_open_device_type.
            match db::find_open_alert(connection, &new_alert.device_id, new_alert.alert_type)? {
                Some(existing) => {
                    return Ok(CreatedAlert {
                        alert: existing,
                        created: false,
                    });
                }
                None => return Err(error),
            }
        }
        Err(error) => return Err(error),
    };

    db::insert_audit_event(
        connection,
        &NewAuditEvent {
            suppression: SuppressionFlags {
                dashboard_only: alert.dashboard_only,
                ..SuppressionFlags::default()
            },
            ..NewAuditEvent::note(
                &alert.device_id,
                now,
                AuditEventKind::AlertCreated,
                format!("{} alert raised: {}", alert.alert_type, alert.message),
            )
        },
    )?;
    db::refresh_alerts_open(connection, &alert.device_id)?;

    tracing::info!(
        device_id = %alert.device_id,
        alert_id = %alert.id,
        alert_type = %alert.alert_type,
        severity = alert.severity.as_str(),
        dashboard_only = alert.dashboard_only,
        "alert raised"
    );

    Ok(CreatedAlert {
        alert,
        created: true,
    })
}

/// Resolves one alert. Returns the resolved alert, or `None` when it does not
/// exist or was already resolved.
pub fn resolve(
    connection: &Connection,
    alert_id: &str,
    now: DateTime<Utc>,
    reason: &str,
) -> Result<Option<Alert>, DbError> {
    let Some(alert) = db::get_alert(connection, alert_id)? else {
        return Ok(None);
    };
    if alert.resolved {
        return Ok(None);
    }
    close(connection, alert, now, reason).map(Some)
}

/// Resolves the open alert of `alert_type` for a device, if there is one.
pub fn resolve_open(
    connection: &Connection,
    device_id: &str,
    alert_type: AlertType,
    now: DateTime<Utc>,
    reason: &str,
) -> Result<Option<Alert>, DbError> {
    match db::find_open_alert(connection, device_id, alert_type)? {
        Some(alert) => close(connection, alert, now, reason).map(Some),
        None => Ok(None),
    }
}

/// Bulk-resolves a device's open alerts, optionally only the listed types.
pub fn acknowledge(
    connection: &Connection,
    device_id: &str,
    types: Option<&[AlertType]>,
    now: DateTime<Utc>,
) -> Result<Vec<Alert>, DbError> {
    let open = open_alerts(connection, device_id)?;
    let mut resolved = Vec::new();

    for alert in open {
        if types.is_some_and(|types| !types.contains(&alert.alert_type)) {
            continue;
        }
        resolved.push(close(connection, alert, now, "acknowledged by operator")?);
    }

    Ok(resolved)
}

pub fn auto_resolve_all(
    connection: &Connection,
    device_id: &str,
    now: DateTime<Utc>,
    reason: &str,
) -> Result<Vec<Alert>, DbError> {
    let open = open_alerts(connection, device_id)?;
    let mut resolved = Vec::with_capacity(open.len());
    for alert in open {
        resolved.push(close(connection, alert, now, reason)?);
    }
    Ok(resolved)
}

fn open_alerts(connection: &Connection, device_id: &str) -> Result<Vec<Alert>, DbError> {
    db::list_alerts(
        connection,
        &AlertFilter {
            device_id: Some(device_id.to_string()),
            open_only: true,
            ..AlertFilter::default()
        },
    )
}

fn close(
    connection: &Connection,
    mut alert: Alert,
    now: DateTime<Utc>,
    reason: &str,
) -> Result<Alert, DbError> {
    if !db::mark_alert_resolved(connection, &alert.id, now)? {
        return Ok(alert);
    }

    db::insert_audit_event(
        connection,
        &NewAuditEvent::note(
            &alert.device_id,
            now,
            AuditEventKind::AlertResolved,
            format!("{} alert resolved: {reason}", alert.alert_type),
        ),
    )?;
    db::refresh_alerts_open(connection, &alert.device_id)?;

    tracing::info!(
        device_id = %alert.device_id,
        alert_id = %alert.id,
        alert_type = %alert.alert_type,
        reason,
        "alert resolved"
    );

    alert.resolved = true;
    alert.resolved_at = Some(now);
    Ok(alert)
}

fn is_unique_violation(error: &DbError) -> bool {
    matches!(
        error,
        DbError::Sqlite(rusqlite::Error::SqliteFailure(failure, _))
            if failure.code == ErrorCode::ConstraintViolation
    )
}
