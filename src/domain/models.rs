use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceStatus {
    Online,
    Idle,
    WarningLowActivity,
    Offline,
    Fault,
    Maintenance,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Idle => "idle",
            Self::WarningLowActivity => "warning-low-activity",
            Self::Offline => "offline",
            Self::Fault => "fault",
            Self::Maintenance => "maintenance",
        }
    }

    /// Statuses that are only reached with a fresh heartbeat.
    pub fn is_heartbeat_derived(self) -> bool {
        matches!(self, Self::Online | Self::Idle | Self::WarningLowActivity)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "online" => Ok(Self::Online),
            "idle" => Ok(Self::Idle),
            "warning-low-activity" => Ok(Self::WarningLowActivity),
            "offline" => Ok(Self::Offline),
            "fault" => Ok(Self::Fault),
            "maintenance" => Ok(Self::Maintenance),
            other => Err(UnknownVariant::new("device status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertType {
    Offline,
    LowActivityWarning,
    NotificationFailure,
    HardwareFault,
    RedemptionError,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::LowActivityWarning => "low-activity-warning",
            Self::NotificationFailure => "notification-failure",
            Self::HardwareFault => "hardware-fault",
            Self::RedemptionError => "redemption-error",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "offline" => Ok(Self::Offline),
            "low-activity-warning" => Ok(Self::LowActivityWarning),
            "notification-failure" => Ok(Self::NotificationFailure),
            "hardware-fault" => Ok(Self::HardwareFault),
            "redemption-error" => Ok(Self::RedemptionError),
            other => Err(UnknownVariant::new("alert type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "critical" => Ok(Self::Critical),
            other => Err(UnknownVariant::new("severity", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatSource {
    Ping,
    Transaction,
    Hardware,
}

impl HeartbeatSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Transaction => "transaction",
            Self::Hardware => "hardware",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditEventKind {
    StatusChange,
    AlertCreated,
    AlertResolved,
    MaintenanceToggled,
    FaultReported,
    FaultResolved,
}

impl AuditEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatusChange => "status-change",
            Self::AlertCreated => "alert-created",
            Self::AlertResolved => "alert-resolved",
            Self::MaintenanceToggled => "maintenance-toggled",
            Self::FaultReported => "fault-reported",
            Self::FaultResolved => "fault-resolved",
        }
    }
}

impl FromStr for AuditEventKind {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "status-change" => Ok(Self::StatusChange),
            "alert-created" => Ok(Self::AlertCreated),
            "alert-resolved" => Ok(Self::AlertResolved),
            "maintenance-toggled" => Ok(Self::MaintenanceToggled),
            "fault-reported" => Ok(Self::FaultReported),
            "fault-resolved" => Ok(Self::FaultResolved),
            other => Err(UnknownVariant::new("audit event kind", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceInfo {
    pub reason: String,
    pub set_by: String,
    pub set_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    pub label: String,
    pub location: String,
    pub terminal_id: Option<String>,
    pub status: DeviceStatus,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_txn_at: Option<DateTime<Utc>>,
    pub last_status_change_at: Option<DateTime<Utc>>,
    pub uptime_daily: f64,
    pub uptime_weekly: f64,
    pub alerts_open: u32,
    pub maintenance: Option<MaintenanceInfo>,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDevice {
    pub id: String,
    pub label: String,
    pub location: String,
    pub terminal_id: Option<String>,
}

/// Notification bookkeeping carried on an alert. Unknown keys survive a
/// read-modify-write through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertMetadata {
    #[serde(default)]
    pub notified: bool,
    #[serde(default)]
    pub last_reminder_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminder_count: u32,
    #[serde(default)]
    pub last_attempt_failed: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: String,
    pub device_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub dashboard_only: bool,
    pub metadata: AlertMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub device_id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub dashboard_only: bool,
    pub metadata: AlertMetadata,
}

/// Thresholds in effect when a decision was taken.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSnapshot {
    pub offline_threshold_minutes: i64,
    pub quiet_window_minutes: i64,
    pub is_busy: bool,
    pub heartbeat_age_minutes: Option<i64>,
    pub txn_age_minutes: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionFlags {
    pub weather: bool,
    pub maintenance: bool,
    pub dashboard_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub id: String,
    pub device_id: String,
    pub created_at: DateTime<Utc>,
    pub kind: AuditEventKind,
    pub previous_status: Option<DeviceStatus>,
    pub new_status: Option<DeviceStatus>,
    pub reason: String,
    pub thresholds: Option<ThresholdSnapshot>,
    pub suppression: SuppressionFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEvent {
    pub device_id: String,
    pub created_at: DateTime<Utc>,
    pub kind: AuditEventKind,
    pub previous_status: Option<DeviceStatus>,
    pub new_status: Option<DeviceStatus>,
    pub reason: String,
    pub thresholds: Option<ThresholdSnapshot>,
    pub suppression: SuppressionFlags,
}

impl NewAuditEvent {
    pub fn note(
        device_id: &str,
        created_at: DateTime<Utc>,
        kind: AuditEventKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            created_at,
            kind,
            previous_status: None,
            new_status: None,
            reason: reason.into(),
            thresholds: None,
            suppression: SuppressionFlags::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaultRecord {
    pub id: String,
    pub device_id: String,
    pub code: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Weather {
    pub temperature_c: Option<f64>,
    #[serde(default)]
    pub precipitation: bool,
    pub observed_at: DateTime<Utc>,
}
