/**
 * API REST EDGE - Frontière HTTP du pont capteurs/actionneurs
 *
 * RÔLE :
 * Expose le lien série, la télémétrie, les règles et les agrégations au
 * dashboard. Aucune logique métier ici : validation des entrées puis appel
 * au noyau.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, toutes les routes sous /api
 * - Capteurs acceptés : light, gas, soil, water (sinon 400 avant le noyau)
 * - Erreurs noyau → codes HTTP + {"error": "..."}
 *
 * SÉCURITÉ :
 * - Si une API key est configurée, header x-api-key obligatoire sur toutes
 *   les routes sauf /api/health
 */

use crate::error::EdgeError;
use crate::health::{EdgeHealth, HealthTracker};
use crate::models::{ActuatorState, NewRule, Rule, RulePatch, SensorChannel, Statistics, TelemetryRecord, TelemetrySample, TrendPoint};
use crate::ports::{analytics, HistoryQuery, StoreError, TelemetryStore};
use crate::rules::RuleEngine;
use crate::serial::transport::{available_ports, PortInfo};
use crate::serial::DeviceLink;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub link: Arc<DeviceLink>,
    pub rules: Arc<RuleEngine>,
    pub telemetry: Arc<dyn TelemetryStore>,
    pub health_tracker: HealthTracker,
    pub api_key: Option<String>,
}

/// Erreur HTTP : code + message sérialisé en {"error": ...}
#[derive(Debug)]
pub struct ApiError(StatusCode, String);

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        ApiError(StatusCode::BAD_REQUEST, msg.into())
    }
}

impl From<EdgeError> for ApiError {
    fn from(e: EdgeError) -> Self {
        let code = match &e {
            EdgeError::NotConnected => StatusCode::BAD_REQUEST,
            EdgeError::AlreadyConnected(_) => StatusCode::CONFLICT,
            EdgeError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
            EdgeError::NotFound(_) => StatusCode::NOT_FOUND,
            EdgeError::TransportFailure { .. } => StatusCode::BAD_GATEWAY,
            EdgeError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(code, e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        EdgeError::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };
    if req.uri().path().starts_with("/api/health") {
        return Ok(next.run(req).await);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);

    if !ok {
        warn!("rejected request without valid api key: {}", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(get_health))
        .route("/serial/ports", get(list_serial_ports))
        .route("/serial/connect", post(connect))
        .route("/serial/disconnect", post(disconnect))
        .route("/serial/command", post(send_command))
        .route("/sensors/current", get(current_sensors))
        .route("/sensors/history", get(sensor_history))
        .route("/actuators/states", get(actuator_states))
        .route("/actuators/sync", post(sync_actuator))
        .route("/analytics/statistics", get(get_statistics))
        .route("/analytics/trends", get(get_trends))
        .route("/rules", get(list_rules).post(create_rule))
        .route("/rules/{id}", put(update_rule).delete(delete_rule))
        .route("/alerts", get(recent_alerts));

    Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /api/health
async fn get_health(State(app): State<AppState>) -> Json<EdgeHealth> {
    Json(app.health_tracker.get_health(&app.link))
}

// GET /api/serial/ports
async fn list_serial_ports() -> ApiResult<Vec<PortInfo>> {
    available_ports()
        .map(Json)
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, format!("port listing failed: {e}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectBody {
    port: String,
    #[serde(default = "default_baud_rate")]
    baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    9600
}

// POST /api/serial/connect
async fn connect(State(app): State<AppState>, Json(body): Json<ConnectBody>) -> ApiResult<Value> {
    if body.port.trim().is_empty() {
        return Err(ApiError::bad_request("port is required"));
    }
    app.link.connect(body.port.trim(), body.baud_rate).await?;
    Ok(Json(json!({ "success": true, "message": format!("connected to {}", body.port.trim()) })))
}

// POST /api/serial/disconnect
async fn disconnect(State(app): State<AppState>) -> ApiResult<Value> {
    app.link.disconnect().await?;
    Ok(Json(json!({ "success": true, "message": "disconnected" })))
}

#[derive(Debug, Deserialize)]
struct CommandBody {
    command: String,
}

// POST /api/serial/command
async fn send_command(State(app): State<AppState>, Json(body): Json<CommandBody>) -> ApiResult<Value> {
    if body.command.trim().is_empty() {
        return Err(ApiError::bad_request("command is required"));
    }
    app.link.send_command(&body.command).await?;
    Ok(Json(json!({ "success": true, "command": body.command.trim() })))
}

// GET /api/sensors/current
async fn current_sensors(State(app): State<AppState>) -> ApiResult<TelemetrySample> {
    app.link
        .current_telemetry()?
        .map(Json)
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, "no telemetry received yet".into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    limit: Option<usize>,
    skip: Option<usize>,
    start_date: Option<String>,
    end_date: Option<String>,
}

impl HistoryParams {
    fn into_query(self) -> Result<HistoryQuery, ApiError> {
        let defaults = HistoryQuery::default();
        Ok(HistoryQuery {
            start: parse_date(self.start_date.as_deref())?,
            end: parse_date(self.end_date.as_deref())?,
            limit: self.limit.unwrap_or(defaults.limit),
            skip: self.skip.unwrap_or(defaults.skip),
        })
    }
}

fn parse_date(raw: Option<&str>) -> Result<Option<OffsetDateTime>, ApiError> {
    raw.filter(|s| !s.is_empty())
        .map(|s| OffsetDateTime::parse(s, &Rfc3339).map_err(|_| ApiError::bad_request(format!("invalid date: {s}"))))
        .transpose()
}

#[derive(Debug, Serialize)]
struct HistoryPage {
    data: Vec<TelemetryRecord>,
    total: usize,
    limit: usize,
    skip: usize,
}

// GET /api/sensors/history
async fn sensor_history(State(app): State<AppState>, Query(params): Query<HistoryParams>) -> ApiResult<HistoryPage> {
    let query = params.into_query()?;
    let page = app.telemetry.find(&query)?;
    Ok(Json(HistoryPage {
        data: page.records,
        total: page.total,
        limit: query.limit,
        skip: query.skip,
    }))
}

// GET /api/actuators/states
async fn actuator_states(State(app): State<AppState>) -> ApiResult<ActuatorState> {
    Ok(Json(app.link.actuator_state()?))
}

#[derive(Debug, Deserialize)]
struct SyncBody {
    actuator: String,
    value: Value,
}

// POST /api/actuators/sync
async fn sync_actuator(State(app): State<AppState>, Json(body): Json<SyncBody>) -> ApiResult<ActuatorState> {
    Ok(Json(app.link.sync_actuator(&body.actuator, &body.value)?))
}

#[derive(Debug, Deserialize)]
struct WindowParams {
    sensor: Option<String>,
    hours: Option<i64>,
}

fn parse_sensor(raw: Option<&str>) -> Result<Option<SensorChannel>, ApiError> {
    raw.filter(|s| !s.is_empty())
        .map(|s| s.parse::<SensorChannel>().map_err(ApiError::bad_request))
        .transpose()
}

/// Fenêtre d'agrégation plafonnée à dix ans
const MAX_WINDOW_HOURS: i64 = 24 * 366 * 10;

fn window_hours(hours: Option<i64>) -> Result<i64, ApiError> {
    match hours.filter(|h| *h > 0) {
        None => Ok(24),
        Some(h) if h > MAX_WINDOW_HOURS => Err(ApiError::bad_request(format!(
            "hours must be at most {MAX_WINDOW_HOURS}"
        ))),
        Some(h) => Ok(h),
    }
}

// GET /api/analytics/statistics
async fn get_statistics(State(app): State<AppState>, Query(params): Query<WindowParams>) -> ApiResult<Statistics> {
    let sensor = parse_sensor(params.sensor.as_deref())?;
    let stats = analytics::statistics(app.telemetry.as_ref(), sensor, window_hours(params.hours)?)?;
    Ok(Json(stats))
}

// GET /api/analytics/trends
async fn get_trends(State(app): State<AppState>, Query(params): Query<WindowParams>) -> ApiResult<Vec<TrendPoint>> {
    Ok(Json(analytics::trends(app.telemetry.as_ref(), window_hours(params.hours)?)?))
}

// GET /api/rules
async fn list_rules(State(app): State<AppState>) -> ApiResult<Vec<Rule>> {
    Ok(Json(app.rules.list()?))
}

fn validate_rule(rule: &NewRule) -> Result<(), ApiError> {
    if rule.name.trim().is_empty() || rule.action.trim().is_empty() {
        return Err(ApiError::bad_request("name and action are required"));
    }
    rule.sensor.parse::<SensorChannel>().map_err(ApiError::bad_request)?;
    Ok(())
}

// POST /api/rules
async fn create_rule(State(app): State<AppState>, Json(body): Json<NewRule>) -> Result<(StatusCode, Json<Rule>), ApiError> {
    validate_rule(&body)?;
    let rule = app.rules.create(body)?;
    Ok((StatusCode::CREATED, Json(rule)))
}

// PUT /api/rules/{id}
async fn update_rule(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<RulePatch>,
) -> ApiResult<Rule> {
    if let Some(sensor) = patch.sensor.as_deref() {
        sensor.parse::<SensorChannel>().map_err(ApiError::bad_request)?;
    }
    Ok(Json(app.rules.update(&id, patch)?))
}

// DELETE /api/rules/{id}
async fn delete_rule(State(app): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    app.rules.delete(&id)?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct AlertParams {
    limit: Option<usize>,
}

// GET /api/alerts
async fn recent_alerts(State(app): State<AppState>, Query(params): Query<AlertParams>) -> ApiResult<Vec<TelemetryRecord>> {
    Ok(Json(app.telemetry.recent_alerts(params.limit.unwrap_or(50))?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_edge_errors_map_to_status_codes() {
        let cases = [
            (EdgeError::NotConnected, StatusCode::BAD_REQUEST),
            (EdgeError::AlreadyConnected("/dev/ttyUSB0".into()), StatusCode::CONFLICT),
            (EdgeError::InvalidIdentifier("x".into()), StatusCode::BAD_REQUEST),
            (EdgeError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                EdgeError::transport("open", io::Error::new(io::ErrorKind::NotFound, "gone")),
                StatusCode::BAD_GATEWAY,
            ),
            (
                EdgeError::PersistenceFailure(StoreError::Unavailable("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(ApiError::from(err).0, code);
        }
    }

    #[test]
    fn test_sensor_whitelist() {
        assert_eq!(parse_sensor(Some("gas")).unwrap(), Some(SensorChannel::Gas));
        assert_eq!(parse_sensor(None).unwrap(), None);
        assert_eq!(parse_sensor(Some("infrared")).unwrap_err().0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_history_params() {
        let params = HistoryParams {
            limit: None,
            skip: Some(20),
            start_date: Some("2025-03-01T00:00:00Z".into()),
            end_date: None,
        };
        let query = params.into_query().unwrap();
        assert_eq!(query.limit, 100);
        assert_eq!(query.skip, 20);
        assert!(query.start.is_some());

        let bad = HistoryParams { limit: None, skip: None, start_date: Some("yesterday".into()), end_date: None };
        assert_eq!(bad.into_query().unwrap_err().0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_rule_validation() {
        let mut rule = crate::rules::default_rules().remove(0);
        assert!(validate_rule(&rule).is_ok());
        rule.sensor = "humidity".into();
        assert!(validate_rule(&rule).is_err());
    }

    #[test]
    fn test_window_defaults_to_a_day() {
        assert_eq!(window_hours(None).unwrap(), 24);
        assert_eq!(window_hours(Some(0)).unwrap(), 24);
        assert_eq!(window_hours(Some(6)).unwrap(), 6);
    }

    #[test]
    fn test_huge_window_is_rejected() {
        assert_eq!(window_hours(Some(MAX_WINDOW_HOURS)).unwrap(), MAX_WINDOW_HOURS);
        assert_eq!(window_hours(Some(1_000_000_000)).unwrap_err().0, StatusCode::BAD_REQUEST);
        assert_eq!(window_hours(Some(i64::MAX)).unwrap_err().0, StatusCode::BAD_REQUEST);
    }
}
