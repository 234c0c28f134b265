use crate::adapters::db;
use crate::app::services::StationQueryHandler;
use crate::domain::models::{
    AlertMetadata, AlertType, AuditEventKind, FaultRecord, MaintenanceInfo, NewAlert,
    NewAuditEvent, Severity,
};
use crate::monitor::{
    EvaluationOutcome, Monitor, MonitorError, alerts, apply_transition, require_device,
};

pub const DEFAULT_MAINTENANCE_REASON: &str = "scheduled maintenance";

#[derive(Debug, Clone, PartialEq)]
pub struct FaultReport {
    pub fault: FaultRecord,
    pub outcome: EvaluationOutcome,
}

impl Monitor {
    /// Records a hardware fault, raises the hardware-fault alert and
    /// re-evaluates the device. A device in maintenance keeps its status and
    /// gets no alert.
    pub fn report_fault(
        &self,
        device_id: &str,
        code: &str,
        description: &str,
    ) -> Result<FaultReport, MonitorError> {
        if code.trim().is_empty() {
            return Err(MonitorError::invalid_input("fault code must not be empty"));
        }
        let now = self.now();

        let (fault, outcome) = self.locked_transition(device_id, now, |tx, config| {
            let device = require_device(tx, device_id)?;
            let fault = db::insert_fault(tx, device_id, code, description, now)?;

            if device.maintenance.is_none() {
                alerts::create(
                    tx,
                    &NewAlert {
                        device_id: device_id.to_string(),
                        alert_type: AlertType::HardwareFault,
                        severity: Severity::Critical,
                        message: format!("fault {code}: {description}"),
                        dashboard_only: false,
                        metadata: AlertMetadata::default(),
                    },
                    now,
                )?;
            }

            db::insert_audit_event(
                tx,
                &NewAuditEvent::note(
                    device_id,
                    now,
                    AuditEventKind::FaultReported,
                    format!("fault {code} reported: {description}"),
                ),
            )?;

            Ok((fault, apply_transition(tx, device_id, config, now)?))
        })?;

        tracing::warn!(device_id, fault_id = %fault.id, code, "hardware fault reported");
        Ok(FaultReport { fault, outcome })
    }

    /// Closes a fault. Once no open fault remains the hardware-fault alert is
    /// resolved and the device re-evaluated. Resolving twice is a no-op.
    pub fn resolve_fault(
        &self,
        fault_id: &str,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<FaultReport, MonitorError> {
        let existing = self
            .store()
            .with_connection(|connection| db::get_fault(connection, fault_id).map_err(MonitorError::from))?
            .ok_or_else(|| MonitorError::FaultNotFound(fault_id.to_string()))?;
        let device_id = existing.device_id.clone();
        let now = self.now();

        let (fault, outcome) = self.locked_transition(&device_id, now, |tx, config| {
            if db::mark_fault_resolved(tx, fault_id, resolved_by, notes, now)? {
                if db::count_open_faults(tx, &device_id)? == 0 {
                    alerts::resolve_open(
                        tx,
                        &device_id,
                        AlertType::HardwareFault,
                        now,
                        &format!("fault {} resolved by {resolved_by}", existing.code),
                    )?;
                }

                db::insert_audit_event(
                    tx,
                    &NewAuditEvent::note(
                        &device_id,
                        now,
                        AuditEventKind::FaultResolved,
                        format!("fault {} resolved by {resolved_by}", existing.code),
                    ),
                )?;
            }

            let fault = db::get_fault(tx, fault_id)?
                .ok_or_else(|| MonitorError::FaultNotFound(fault_id.to_string()))?;
            Ok((fault, apply_transition(tx, &device_id, config, now)?))
        })?;

        tracing::info!(device_id = %device_id, fault_id, resolved_by, "hardware fault resolved");
        Ok(FaultReport { fault, outcome })
    }

    pub fn list_faults(&self, device_id: &str, open_only: bool) -> Result<Vec<FaultRecord>, MonitorError> {
        self.get_device(device_id)?;
        Ok(self.store().list_faults(device_id, open_only)?)
    }

    /// Turns maintenance mode on or off. Entering maintenance resolves every
    /// open alert; leaving it lets the next evaluation derive the status from
    /// telemetry again.
    pub fn set_maintenance(
        &self,
        device_id: &str,
        enabled: bool,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<EvaluationOutcome, MonitorError> {
        let now = self.now();

        let (auto_resolved, mut outcome) = self.locked_transition(device_id, now, |tx, config| {
            require_device(tx, device_id)?;

            let (info, auto_resolved, note) = if enabled {
                let reason = reason
                    .map(str::trim)
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or(DEFAULT_MAINTENANCE_REASON);
                let info = MaintenanceInfo {
                    reason: reason.to_string(),
                    set_by: actor.to_string(),
                    set_at: now,
                };
                let resolved =
                    alerts::auto_resolve_all(tx, device_id, now, "device entered maintenance")?;
                (Some(info), resolved, format!("maintenance enabled by {actor}: {reason}"))
            } else {
                (None, Vec::new(), format!("maintenance disabled by {actor}"))
            };

            db::set_device_maintenance(tx, device_id, info.as_ref())?;
            db::insert_audit_event(
                tx,
                &NewAuditEvent::note(device_id, now, AuditEventKind::MaintenanceToggled, note),
            )?;

            Ok((auto_resolved, apply_transition(tx, device_id, config, now)?))
        })?;

        outcome.alerts_resolved.extend(auto_resolved);
        tracing::info!(device_id, enabled, actor, "maintenance mode toggled");
        Ok(outcome)
    }
}
