use std::sync::Arc;

use actix_web::{HttpResponse, Responder, get, post, put, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adapters::db::{AlertFilter, format_ts};
use crate::app::services::{ServiceError, StationQueryHandler};
use crate::domain::models::{
    Alert, AlertType, AuditEvent, Device, FaultRecord, HeartbeatSource, NewDevice,
    SuppressionFlags, ThresholdSnapshot, Weather,
};
use crate::domain::monitoring_config::{MonitoringConfig, MonitoringConfigOverride};
use crate::domain::uptime::UptimeWindow;
use crate::monitor::faults::FaultReport;
use crate::monitor::harness::ScenarioReport;
use crate::monitor::uptime::UptimeReport;
use crate::monitor::{EvaluationOutcome, Monitor, MonitorError, SweepReport};

#[derive(Clone)]
pub struct ApiState {
    pub monitor: Arc<Monitor>,
}

// ------------------------------------------------------------------ views

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceResponse {
    pub reason: String,
    pub set_by: String,
    pub set_at: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    pub id: String,
    pub label: String,
    pub location: String,
    pub terminal_id: Option<String>,
    pub status: String,
    pub last_heartbeat_at: Option<String>,
    pub last_txn_at: Option<String>,
    pub last_status_change_at: Option<String>,
    pub uptime_daily: f64,
    pub uptime_weekly: f64,
    pub alerts_open: u32,
    pub maintenance: Option<MaintenanceResponse>,
}

impl From<Device> for DeviceResponse {
    fn from(device: Device) -> Self {
        Self {
            id: device.id,
            label: device.label,
            location: device.location,
            terminal_id: device.terminal_id,
            status: device.status.to_string(),
            last_heartbeat_at: device.last_heartbeat_at.map(format_ts),
            last_txn_at: device.last_txn_at.map(format_ts),
            last_status_change_at: device.last_status_change_at.map(format_ts),
            uptime_daily: device.uptime_daily,
            uptime_weekly: device.uptime_weekly,
            alerts_open: device.alerts_open,
            maintenance: device.maintenance.map(|info| MaintenanceResponse {
                reason: info.reason,
                set_by: info.set_by,
                set_at: format_ts(info.set_at),
            }),
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertResponse {
    pub id: String,
    pub device_id: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: String,
    pub message: String,
    pub created_at: String,
    pub resolved: bool,
    pub resolved_at: Option<String>,
    pub dashboard_only: bool,
    pub notified: bool,
    pub last_reminder_at: Option<String>,
    pub reminder_count: u32,
}

impl From<Alert> for AlertResponse {
    fn from(alert: Alert) -> Self {
        Self {
            id: alert.id,
            device_id: alert.device_id,
            alert_type: alert.alert_type.to_string(),
            severity: alert.severity.as_str().to_string(),
            message: alert.message,
            created_at: format_ts(alert.created_at),
            resolved: alert.resolved,
            resolved_at: alert.resolved_at.map(format_ts),
            dashboard_only: alert.dashboard_only,
            notified: alert.metadata.notified,
            last_reminder_at: alert.metadata.last_reminder_at.map(format_ts),
            reminder_count: alert.metadata.reminder_count,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEventResponse {
    pub id: String,
    pub device_id: String,
    pub created_at: String,
    pub kind: String,
    pub previous_status: Option<String>,
    pub new_status: Option<String>,
    pub reason: String,
    pub thresholds: Option<ThresholdSnapshot>,
    pub suppression: SuppressionFlags,
}

impl From<AuditEvent> for AuditEventResponse {
    fn from(event: AuditEvent) -> Self {
        Self {
            id: event.id,
            device_id: event.device_id,
            created_at: format_ts(event.created_at),
            kind: event.kind.as_str().to_string(),
            previous_status: event.previous_status.map(|status| status.to_string()),
            new_status: event.new_status.map(|status| status.to_string()),
            reason: event.reason,
            thresholds: event.thresholds,
            suppression: event.suppression,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FaultResponse {
    pub id: String,
    pub device_id: String,
    pub code: String,
    pub description: String,
    pub created_at: String,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<String>,
    pub notes: Option<String>,
}

impl From<FaultRecord> for FaultResponse {
    fn from(fault: FaultRecord) -> Self {
        Self {
            id: fault.id,
            device_id: fault.device_id,
            code: fault.code,
            description: fault.description,
            created_at: format_ts(fault.created_at),
            resolved: fault.resolved,
            resolved_by: fault.resolved_by,
            resolved_at: fault.resolved_at.map(format_ts),
            notes: fault.notes,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResponse {
    pub device_id: String,
    pub previous_status: String,
    pub status: String,
    pub changed: bool,
    pub reason: String,
    pub thresholds: ThresholdSnapshot,
    pub suppression: SuppressionFlags,
    pub alert_raised: Option<AlertResponse>,
    pub alerts_resolved: Vec<AlertResponse>,
    pub offline_notified: bool,
    pub recovery_notified: bool,
}

impl From<EvaluationOutcome> for EvaluationResponse {
    fn from(outcome: EvaluationOutcome) -> Self {
        Self {
            device_id: outcome.device_id,
            previous_status: outcome.previous.to_string(),
            status: outcome.decision.status.to_string(),
            changed: outcome.changed,
            reason: outcome.decision.reason,
            thresholds: outcome.decision.thresholds,
            suppression: outcome.decision.suppression,
            alert_raised: outcome.alert_raised.map(AlertResponse::from),
            alerts_resolved: outcome
                .alerts_resolved
                .into_iter()
                .map(AlertResponse::from)
                .collect(),
            offline_notified: outcome.offline_notified,
            recovery_notified: outcome.recovery_notified,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FaultReportResponse {
    pub fault: FaultResponse,
    pub evaluation: EvaluationResponse,
}

impl From<FaultReport> for FaultReportResponse {
    fn from(report: FaultReport) -> Self {
        Self {
            fault: report.fault.into(),
            evaluation: report.outcome.into(),
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UptimeResponse {
    pub device_id: String,
    pub window: UptimeWindow,
    pub percent: f64,
    pub offline_minutes: i64,
    pub data_available: bool,
}

impl From<UptimeReport> for UptimeResponse {
    fn from(report: UptimeReport) -> Self {
        Self {
            device_id: report.device_id,
            window: report.window,
            percent: report.percent,
            offline_minutes: report.offline_minutes,
            data_available: report.data_available,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReportResponse {
    pub name: String,
    pub device_id: String,
    pub passed: bool,
    pub mismatches: Vec<String>,
    pub status: String,
    pub open_alerts: Vec<String>,
    pub notifications: usize,
    pub suppressed: bool,
}

impl From<ScenarioReport> for ScenarioReportResponse {
    fn from(report: ScenarioReport) -> Self {
        Self {
            name: report.name,
            device_id: report.device_id,
            passed: report.passed,
            mismatches: report.mismatches,
            status: report.status.to_string(),
            open_alerts: report
                .open_alerts
                .into_iter()
                .map(|alert_type| alert_type.to_string())
                .collect(),
            notifications: report.notifications,
            suppressed: report.suppressed,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AcceptanceRunResponse {
    pub passed: usize,
    pub failed: usize,
    pub scenarios: Vec<ScenarioReportResponse>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SweepResponse {
    pub devices: usize,
    pub evaluated: usize,
    pub changed: usize,
    pub failed: usize,
    pub reminders_sent: usize,
    pub reminders_failed: usize,
    pub uptime_refreshed: usize,
}

impl From<SweepReport> for SweepResponse {
    fn from(report: SweepReport) -> Self {
        Self {
            devices: report.devices,
            evaluated: report.evaluated,
            changed: report.changed,
            failed: report.failed,
            reminders_sent: report.reminders_sent,
            reminders_failed: report.reminders_failed,
            uptime_refreshed: report.uptime_refreshed,
        }
    }
}

// --------------------------------------------------------------- requests

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub location: String,
    pub terminal_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HeartbeatRequest {
    pub source: Option<HeartbeatSource>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AcknowledgeRequest {
    pub types: Option<Vec<AlertType>>,
}

#[derive(Debug, Deserialize)]
pub struct ReportFaultRequest {
    pub code: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveFaultRequest {
    pub resolved_by: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub enabled: bool,
    pub reason: Option<String>,
    pub actor: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherRequest {
    pub temperature_c: Option<f64>,
    #[serde(default)]
    pub precipitation: bool,
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct AlertListQuery {
    pub open: Option<bool>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct FaultListQuery {
    pub open: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UptimeQuery {
    pub window: Option<UptimeWindow>,
}

// ----------------------------------------------------------------- routes

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(list_devices_endpoint)
        .service(register_device_endpoint)
        .service(get_device_endpoint)
        .service(heartbeat_endpoint)
        .service(evaluate_endpoint)
        .service(list_device_alerts_endpoint)
        .service(acknowledge_alerts_endpoint)
        .service(list_alerts_endpoint)
        .service(resolve_alert_endpoint)
        .service(list_events_endpoint)
        .service(report_fault_endpoint)
        .service(list_faults_endpoint)
        .service(resolve_fault_endpoint)
        .service(maintenance_endpoint)
        .service(uptime_endpoint)
        .service(device_weather_endpoint)
        .service(global_weather_endpoint)
        .service(get_monitoring_config_endpoint)
        .service(put_monitoring_config_endpoint)
        .service(put_device_config_endpoint)
        .service(sweep_endpoint)
        .service(acceptance_tests_endpoint);
}

#[get("/health")]
async fn health(state: web::Data<ApiState>) -> impl Responder {
    match state.monitor.store().get_schema_version() {
        Ok(schema_version) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "schemaVersion": schema_version
        })),
        Err(error) => monitor_error_response(error.into()),
    }
}

#[get("/devices")]
async fn list_devices_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.monitor.list_devices() {
        Ok(devices) => {
            let mapped: Vec<DeviceResponse> = devices.into_iter().map(DeviceResponse::from).collect();
            HttpResponse::Ok().json(mapped)
        }
        Err(error) => monitor_error_response(error),
    }
}

#[post("/devices")]
async fn register_device_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<RegisterDeviceRequest>,
) -> impl Responder {
    let body = body.into_inner();
    let device = NewDevice {
        id: body.id.trim().to_string(),
        label: body.label,
        location: body.location,
        terminal_id: body.terminal_id,
    };

    match run_blocking(&state, move |monitor| monitor.register_device(&device)).await {
        Ok(device) => HttpResponse::Created().json(DeviceResponse::from(device)),
        Err(response) => response,
    }
}

#[get("/devices/{id}")]
async fn get_device_endpoint(state: web::Data<ApiState>, path: web::Path<String>) -> impl Responder {
    match state.monitor.get_device(&path) {
        Ok(device) => HttpResponse::Ok().json(DeviceResponse::from(device)),
        Err(error) => monitor_error_response(error),
    }
}

#[post("/devices/{id}/heartbeat")]
async fn heartbeat_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    body: Option<web::Json<HeartbeatRequest>>,
) -> impl Responder {
    let device_id = path.into_inner();
    let source = body
        .and_then(|body| body.into_inner().source)
        .unwrap_or(HeartbeatSource::Ping);

    match run_blocking(&state, move |monitor| monitor.ingest_heartbeat(&device_id, source)).await {
        Ok(outcome) => HttpResponse::Ok().json(EvaluationResponse::from(outcome)),
        Err(response) => response,
    }
}

#[post("/devices/{id}/evaluate")]
async fn evaluate_endpoint(state: web::Data<ApiState>, path: web::Path<String>) -> impl Responder {
    let device_id = path.into_inner();
    match run_blocking(&state, move |monitor| monitor.evaluate(&device_id)).await {
        Ok(outcome) => HttpResponse::Ok().json(EvaluationResponse::from(outcome)),
        Err(response) => response,
    }
}

#[get("/devices/{id}/alerts")]
async fn list_device_alerts_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    query: web::Query<AlertListQuery>,
) -> impl Responder {
    let device_id = path.into_inner();
    if let Err(error) = state.monitor.get_device(&device_id) {
        return monitor_error_response(error);
    }
    alerts_response(
        &state,
        AlertFilter {
            device_id: Some(device_id),
            alert_type: None,
            open_only: query.open.unwrap_or(false),
            limit: Some(query.limit.unwrap_or(100).clamp(1, 500)),
        },
    )
}

#[post("/devices/{id}/alerts/acknowledge")]
async fn acknowledge_alerts_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    body: Option<web::Json<AcknowledgeRequest>>,
) -> impl Responder {
    let device_id = path.into_inner();
    let types = body.and_then(|body| body.into_inner().types);

    match run_blocking(&state, move |monitor| {
        monitor.acknowledge_alerts(&device_id, types.as_deref())
    })
    .await
    {
        Ok(alerts) => {
            let mapped: Vec<AlertResponse> = alerts.into_iter().map(AlertResponse::from).collect();
            HttpResponse::Ok().json(mapped)
        }
        Err(response) => response,
    }
}

#[get("/alerts")]
async fn list_alerts_endpoint(
    state: web::Data<ApiState>,
    query: web::Query<AlertListQuery>,
) -> impl Responder {
    alerts_response(
        &state,
        AlertFilter {
            device_id: None,
            alert_type: None,
            open_only: query.open.unwrap_or(false),
            limit: Some(query.limit.unwrap_or(100).clamp(1, 500)),
        },
    )
}

#[post("/alerts/{id}/resolve")]
async fn resolve_alert_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> impl Responder {
    let alert_id = path.into_inner();
    match run_blocking(&state, move |monitor| monitor.resolve_alert(&alert_id)).await {
        Ok(alert) => HttpResponse::Ok().json(AlertResponse::from(alert)),
        Err(response) => response,
    }
}

#[get("/devices/{id}/events")]
async fn list_events_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    query: web::Query<EventsQuery>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    match state.monitor.list_audit_events(&path, limit) {
        Ok(events) => {
            let mapped: Vec<AuditEventResponse> =
                events.into_iter().map(AuditEventResponse::from).collect();
            HttpResponse::Ok().json(mapped)
        }
        Err(error) => monitor_error_response(error),
    }
}

#[post("/devices/{id}/faults")]
async fn report_fault_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    body: web::Json<ReportFaultRequest>,
) -> impl Responder {
    let device_id = path.into_inner();
    let body = body.into_inner();

    match run_blocking(&state, move |monitor| {
        monitor.report_fault(&device_id, &body.code, &body.description)
    })
    .await
    {
        Ok(report) => HttpResponse::Created().json(FaultReportResponse::from(report)),
        Err(response) => response,
    }
}

#[get("/devices/{id}/faults")]
async fn list_faults_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    query: web::Query<FaultListQuery>,
) -> impl Responder {
    match state
        .monitor
        .list_faults(&path, query.open.unwrap_or(false))
    {
        Ok(faults) => {
            let mapped: Vec<FaultResponse> = faults.into_iter().map(FaultResponse::from).collect();
            HttpResponse::Ok().json(mapped)
        }
        Err(error) => monitor_error_response(error),
    }
}

#[post("/faults/{id}/resolve")]
async fn resolve_fault_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    body: web::Json<ResolveFaultRequest>,
) -> impl Responder {
    let fault_id = path.into_inner();
    let body = body.into_inner();

    match run_blocking(&state, move |monitor| {
        monitor.resolve_fault(&fault_id, &body.resolved_by, body.notes.as_deref())
    })
    .await
    {
        Ok(report) => HttpResponse::Ok().json(FaultReportResponse::from(report)),
        Err(response) => response,
    }
}

#[post("/devices/{id}/maintenance")]
async fn maintenance_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    body: web::Json<MaintenanceRequest>,
) -> impl Responder {
    let device_id = path.into_inner();
    let body = body.into_inner();
    if body.actor.trim().is_empty() {
        return monitor_error_response(MonitorError::invalid_input("actor must not be empty"));
    }

    match run_blocking(&state, move |monitor| {
        monitor.set_maintenance(&device_id, body.enabled, body.reason.as_deref(), &body.actor)
    })
    .await
    {
        Ok(outcome) => HttpResponse::Ok().json(EvaluationResponse::from(outcome)),
        Err(response) => response,
    }
}

#[get("/devices/{id}/uptime")]
async fn uptime_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    query: web::Query<UptimeQuery>,
) -> impl Responder {
    let window = query.window.unwrap_or(UptimeWindow::Daily);
    match state.monitor.uptime(&path, window) {
        Ok(report) => HttpResponse::Ok().json(UptimeResponse::from(report)),
        Err(error) => monitor_error_response(error),
    }
}

#[put("/devices/{id}/weather")]
async fn device_weather_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    body: web::Json<WeatherRequest>,
) -> impl Responder {
    let device_id = path.into_inner();
    store_weather(&state, Some(device_id), body.into_inner()).await
}

#[put("/weather")]
async fn global_weather_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<WeatherRequest>,
) -> impl Responder {
    store_weather(&state, None, body.into_inner()).await
}

#[get("/config/monitoring")]
async fn get_monitoring_config_endpoint(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.monitor.monitoring_config())
}

#[put("/config/monitoring")]
async fn put_monitoring_config_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<MonitoringConfig>,
) -> impl Responder {
    let config = body.into_inner();
    match run_blocking(&state, move |monitor| {
        monitor.set_monitoring_config(&config)?;
        Ok(monitor.monitoring_config())
    })
    .await
    {
        Ok(config) => HttpResponse::Ok().json(config),
        Err(response) => response,
    }
}

#[put("/devices/{id}/config")]
async fn put_device_config_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    body: web::Json<MonitoringConfigOverride>,
) -> impl Responder {
    let device_id = path.into_inner();
    let overlay = body.into_inner();
    match run_blocking(&state, move |monitor| {
        monitor.set_device_override(&device_id, &overlay)?;
        Ok(monitor.effective_config(&device_id))
    })
    .await
    {
        Ok(config) => HttpResponse::Ok().json(config),
        Err(response) => response,
    }
}

#[post("/sweep")]
async fn sweep_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match run_blocking(&state, |monitor| monitor.sweep()).await {
        Ok(report) => HttpResponse::Ok().json(SweepResponse::from(report)),
        Err(response) => response,
    }
}

#[post("/acceptance-tests/run")]
async fn acceptance_tests_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match run_blocking(&state, |monitor| monitor.run_acceptance_suite()).await {
        Ok(reports) => {
            let passed = reports.iter().filter(|report| report.passed).count();
            HttpResponse::Ok().json(AcceptanceRunResponse {
                passed,
                failed: reports.len() - passed,
                scenarios: reports.into_iter().map(ScenarioReportResponse::from).collect(),
            })
        }
        Err(response) => response,
    }
}

// ---------------------------------------------------------------- helpers

fn alerts_response(state: &ApiState, filter: AlertFilter) -> HttpResponse {
    match state.monitor.list_alerts(&filter) {
        Ok(alerts) => {
            let mapped: Vec<AlertResponse> = alerts.into_iter().map(AlertResponse::from).collect();
            HttpResponse::Ok().json(mapped)
        }
        Err(error) => monitor_error_response(error),
    }
}

async fn store_weather(
    state: &web::Data<ApiState>,
    device_id: Option<String>,
    body: WeatherRequest,
) -> HttpResponse {
    match run_blocking(state, move |monitor| {
        let weather = Weather {
            temperature_c: body.temperature_c,
            precipitation: body.precipitation,
            observed_at: body.observed_at.unwrap_or_else(|| monitor.now()),
        };
        monitor.set_weather(device_id.as_deref(), &weather)?;
        Ok(weather)
    })
    .await
    {
        Ok(weather) => HttpResponse::Ok().json(weather),
        Err(response) => response,
    }
}

/// Runs a synchronous engine call on actix's blocking pool. Engine calls may
/// wait on locks and on the notification sink.
async fn run_blocking<T, F>(state: &web::Data<ApiState>, op: F) -> Result<T, HttpResponse>
where
    F: FnOnce(&Monitor) -> Result<T, MonitorError> + Send + 'static,
    T: Send + 'static,
{
    let monitor = Arc::clone(&state.monitor);
    match web::block(move || op(&monitor)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(monitor_error_response(error)),
        Err(error) => Err(HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("blocking task failed: {error}")
        }))),
    }
}

fn monitor_error_response(error: MonitorError) -> HttpResponse {
    let message = error.to_string();
    match error {
        MonitorError::DeviceNotFound(_)
        | MonitorError::AlertNotFound(_)
        | MonitorError::FaultNotFound(_) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": message }))
        }
        MonitorError::ConcurrentUpdate(_) | MonitorError::SweepAlreadyRunning => {
            HttpResponse::Conflict().json(serde_json::json!({ "error": message }))
        }
        MonitorError::InvalidConfig(_) | MonitorError::InvalidInput(_) => {
            HttpResponse::BadRequest().json(serde_json::json!({ "error": message }))
        }
        MonitorError::Store(ServiceError::DbLockPoisoned) => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "database lock poisoned"
            }))
        }
        MonitorError::Store(ServiceError::Database(error)) => {
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("database query failed: {error}")
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{App, body::to_bytes, http::StatusCode, test, web};
    use chrono::Duration;

    use crate::domain::models::HeartbeatSource;
    use crate::test_support::{TestMonitor, station, test_monitor};

    use super::{ApiState, configure_routes};

    fn state(fixture: &TestMonitor) -> ApiState {
        ApiState {
            monitor: Arc::clone(&fixture.monitor),
        }
    }

    async fn json_body(resp: actix_web::dev::ServiceResponse) -> serde_json::Value {
        let body = to_bytes(resp.into_body())
            .await
            .expect("body should be readable");
        serde_json::from_slice(&body).expect("body should be json")
    }

    #[actix_web::test]
    async fn health_endpoint_returns_ok() {
        let fixture = test_monitor("api-health");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&fixture)))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["status"], "ok");
        assert!(json["schemaVersion"].as_u64().unwrap_or(0) >= 1);
    }

    #[actix_web::test]
    async fn register_then_heartbeat_reports_online() {
        let fixture = test_monitor("api-register");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&fixture)))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/devices")
            .set_json(serde_json::json!({
                "id": "st-9",
                "label": "Bay 9",
                "location": "Harbour Road",
                "terminalId": "T-9"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = json_body(resp).await;
        assert_eq!(json["status"], "offline");
        assert_eq!(json["terminalId"], "T-9");

        let req = test::TestRequest::post()
            .uri("/devices/st-9/heartbeat")
            .set_json(serde_json::json!({ "source": "transaction" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["previousStatus"], "offline");
        assert_eq!(json["status"], "online");
        assert_eq!(json["changed"], true);

        let req = test::TestRequest::get().uri("/devices/st-9").to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json["status"], "online");
        assert_eq!(json["lastTxnAt"], "2026-06-10T14:00:00.000Z");
    }

    #[actix_web::test]
    async fn unknown_device_returns_404() {
        let fixture = test_monitor("api-missing");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&fixture)))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/devices/ghost/heartbeat")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/devices/ghost/uptime").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn offline_alert_is_listed_and_acknowledged() {
        let fixture = test_monitor("api-alerts");
        fixture.monitor.register_device(&station("st-1")).expect("register");
        fixture
            .monitor
            .ingest_heartbeat("st-1", HeartbeatSource::Ping)
            .expect("ingest");
        fixture.clock.advance(Duration::minutes(45));
        fixture.monitor.evaluate("st-1").expect("evaluate");

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&fixture)))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/alerts?open=true").to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        let items = json.as_array().expect("response should be an array");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["type"], "offline");
        assert_eq!(items[0]["severity"], "critical");
        assert_eq!(items[0]["notified"], true);

        let req = test::TestRequest::post()
            .uri("/devices/st-1/alerts/acknowledge")
            .set_json(serde_json::json!({ "types": ["offline"] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json.as_array().map(Vec::len), Some(1));

        let req = test::TestRequest::get()
            .uri("/devices/st-1/alerts?open=true")
            .to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json.as_array().map(Vec::len), Some(0));

        let req = test::TestRequest::get()
            .uri("/devices/st-1/events?limit=10")
            .to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json[0]["kind"], "alert-resolved");
    }

    #[actix_web::test]
    async fn invalid_monitoring_config_is_rejected() {
        let fixture = test_monitor("api-config");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&fixture)))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/config/monitoring")
            .set_json(serde_json::json!({ "busyStartHour": 27 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::put()
            .uri("/config/monitoring")
            .set_json(serde_json::json!({ "offlineThresholdMinutes": 45 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/config/monitoring").to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json["offlineThresholdMinutes"], 45);
        assert_eq!(json["busyQuietMinutes"], 90);
    }

    #[actix_web::test]
    async fn maintenance_and_fault_round_trip() {
        let fixture = test_monitor("api-maintenance");
        fixture.monitor.register_device(&station("st-1")).expect("register");
        fixture
            .monitor
            .ingest_heartbeat("st-1", HeartbeatSource::Transaction)
            .expect("ingest");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&fixture)))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/devices/st-1/faults")
            .set_json(serde_json::json!({ "code": "E42", "description": "pump" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = json_body(resp).await;
        assert_eq!(json["evaluation"]["status"], "fault");
        let fault_id = json["fault"]["id"]
            .as_str()
            .expect("fault id")
            .to_string();

        let req = test::TestRequest::post()
            .uri("/devices/st-1/maintenance")
            .set_json(serde_json::json!({ "enabled": true, "reason": "pump swap", "actor": "ops" }))
            .to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json["status"], "maintenance");
        assert_eq!(json["suppression"]["maintenance"], true);

        let req = test::TestRequest::post()
            .uri(&format!("/faults/{fault_id}/resolve"))
            .set_json(serde_json::json!({ "resolvedBy": "tech-1", "notes": "new pump" }))
            .to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json["fault"]["resolved"], true);
        assert_eq!(json["evaluation"]["status"], "maintenance");

        let req = test::TestRequest::post()
            .uri("/devices/st-1/maintenance")
            .set_json(serde_json::json!({ "enabled": false, "actor": "ops" }))
            .to_request();
        let json = json_body(test::call_service(&app, req).await).await;
        assert_eq!(json["status"], "online");
    }

    #[actix_web::test]
    async fn acceptance_run_reports_every_scenario() {
        let fixture = test_monitor("api-acceptance");
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&fixture)))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/acceptance-tests/run")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["passed"], 7);
        assert_eq!(json["failed"], 0);
    }
}
