// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The external command/response boundary named in §6: a thin `axum`
//! router over the [`Core`](crate::core::Core). §1 marks REST/WebSocket
//! front-ends as out of scope; this module is the minimal surface the core
//! itself exports so the crate is runnable end-to-end, not a UI.
//!
//! Endpoints:
//!   GET    /api/cameras                          → list known cameras
//!   POST   /api/cameras/{id}/connect              → connect_camera
//!   POST   /api/cameras/{id}/disconnect           → disconnect_camera
//!   POST   /api/cameras/connect-many              → connect_many (batch)
//!   POST   /api/cameras/{id}/stream/start         → start_camera_stream
//!   POST   /api/cameras/{id}/stream/stop          → stop_camera_stream
//!   GET    /api/streams                           → get_active_streams
//!   GET    /api/cameras/{id}/stream/metrics        → get_stream_metrics
//!   POST   /api/cameras/{id}/snapshot              → capture_snapshot
//!   POST   /api/cameras/{id}/ptz                   → ptz_control
//!   GET    /api/metrics                           → orchestrator metrics
//!   POST   /api/scans                             → start_scan
//!   POST   /api/scans/{id}/cancel                  → cancel_scan
//!   GET    /api/scans/{id}                         → scan_status
//!   GET    /api/scans/{id}/results                 → scan_results
//!   GET    /api/scans/optimal?ip=...              → get_optimal_scan_range

use std::net::Ipv4Addr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::camera::Camera;
use crate::connection::ConnectionKind;
use crate::core::Core;
use crate::error::CoreError;
use crate::protocol::PtzDirection;
use crate::scan::{ScanMethod, ScanPriority, ScanRange};

/// Shared state passed to all handlers.
pub struct AppState {
    pub core: Arc<Core>,
}

// ──────────────── request / response types ────────────────────────────────

#[derive(Serialize)]
struct CameraSummary {
    camera_id: Uuid,
    display_name: String,
    vendor: String,
    model: String,
    ip: String,
    is_active: bool,
}

impl From<&Camera> for CameraSummary {
    fn from(c: &Camera) -> Self {
        Self {
            camera_id: c.camera_id,
            display_name: c.display_name.clone(),
            vendor: c.vendor.clone(),
            model: c.model.clone(),
            ip: c.connection.ip.clone(),
            is_active: c.is_active,
        }
    }
}

#[derive(Deserialize)]
struct ConnectManyRequest {
    camera_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
struct PtzRequest {
    /// "move" | "stop"
    #[serde(default = "default_ptz_action")]
    action: String,
    direction: String,
    #[serde(default = "default_ptz_speed")]
    speed: u8,
}

fn default_ptz_action() -> String {
    "move".to_string()
}

fn default_ptz_speed() -> u8 {
    4
}

#[derive(Deserialize)]
struct PresetRequest {
    preset_id: u8,
    /// "set" | "goto"
    action: String,
}

#[derive(Deserialize)]
struct StartScanRequest {
    start_ip: Ipv4Addr,
    end_ip: Ipv4Addr,
    #[serde(default)]
    ports: Vec<u16>,
    #[serde(default)]
    methods: Vec<ScanMethod>,
    #[serde(default)]
    priority: Option<ScanPriority>,
    #[serde(default)]
    use_cache: bool,
}

#[derive(Deserialize)]
struct OptimalRangeParams {
    ip: Ipv4Addr,
}

#[derive(Serialize)]
struct ScanStartedResponse {
    scan_id: Uuid,
}

/// Uniform error body for every failed request (§7: every failure produces
/// one terminal response; `ValidationError`/`AuthError` synchronously here).
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(err: CoreError) -> axum::response::Response {
    let status = match &err {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::Auth(_) => StatusCode::UNAUTHORIZED,
        CoreError::NotConnected => StatusCode::CONFLICT,
        CoreError::CameraNotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::Timeout(_) | CoreError::Unreachable(_) => StatusCode::GATEWAY_TIMEOUT,
        CoreError::Cancelled => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, axum::Json(ErrorBody { error: err.to_string() })).into_response()
}

fn parse_direction(s: &str) -> Result<PtzDirection, CoreError> {
    match s.to_ascii_lowercase().as_str() {
        "up" => Ok(PtzDirection::Up),
        "down" => Ok(PtzDirection::Down),
        "left" => Ok(PtzDirection::Left),
        "right" => Ok(PtzDirection::Right),
        "zoom_in" | "zoomin" => Ok(PtzDirection::ZoomIn),
        "zoom_out" | "zoomout" => Ok(PtzDirection::ZoomOut),
        other => Err(CoreError::Validation(format!("unknown PTZ direction '{other}'"))),
    }
}

fn find_camera(state: &AppState, camera_id: Uuid) -> Result<Camera, CoreError> {
    state.core.camera(camera_id).ok_or(CoreError::CameraNotFound { id: camera_id.to_string() })
}

// ──────────────── router ──────────────────────────────────────────────────

/// Build the axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/cameras", get(handle_list_cameras))
        .route("/api/cameras/{id}/connect", post(handle_connect_camera))
        .route("/api/cameras/{id}/disconnect", post(handle_disconnect_camera))
        .route("/api/cameras/connect-many", post(handle_connect_many))
        .route("/api/cameras/{id}/stream/start", post(handle_start_stream))
        .route("/api/cameras/{id}/stream/stop", post(handle_stop_stream))
        .route("/api/cameras/{id}/stream/metrics", get(handle_stream_metrics))
        .route("/api/cameras/{id}/snapshot", post(handle_capture_snapshot))
        .route("/api/cameras/{id}/ptz", post(handle_ptz_control))
        .route("/api/cameras/{id}/ptz/preset", post(handle_ptz_preset))
        .route("/api/streams", get(handle_active_streams))
        .route("/api/metrics", get(handle_orchestrator_metrics))
        .route("/api/scans", post(handle_start_scan))
        .route("/api/scans/{id}/cancel", post(handle_cancel_scan))
        .route("/api/scans/{id}", get(handle_scan_status))
        .route("/api/scans/{id}/results", get(handle_scan_results))
        .route("/api/scans/optimal", get(handle_optimal_range))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(state: Arc<AppState>, port: u16) {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", port);
    info!(port, "HTTP API listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "Failed to bind HTTP server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "HTTP server error");
    }
}

// ──────────────── handlers ────────────────────────────────────────────────

async fn handle_list_cameras(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cameras: Vec<CameraSummary> = state.core.cameras().iter().map(CameraSummary::from).collect();
    (StatusCode::OK, axum::Json(cameras)).into_response()
}

async fn handle_connect_camera(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let camera = match find_camera(&state, id) {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };
    match state.core.orchestrator.connect_camera(camera, ConnectionKind::Stream).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_disconnect_camera(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    // Idempotent per §8 property 9: succeeds even for an unknown camera_id.
    state.core.orchestrator.disconnect_camera(id).await;
    StatusCode::OK
}

async fn handle_connect_many(
    State(state): State<Arc<AppState>>,
    axum::Json(req): axum::Json<ConnectManyRequest>,
) -> impl IntoResponse {
    let cameras: Vec<Camera> = req.camera_ids.iter().filter_map(|id| state.core.camera(*id)).collect();
    let batch = state.core.orchestrator.connect_many(cameras).await;
    (StatusCode::OK, axum::Json(batch)).into_response()
}

async fn handle_start_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let camera = match find_camera(&state, id) {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };
    let buffer_size = state.core.config.network.buffer_size;
    match state.core.orchestrator.start_stream(camera, buffer_size).await {
        Ok(pipeline) => (StatusCode::OK, axum::Json(pipeline.metrics_snapshot())).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_stop_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    state.core.orchestrator.stop_stream(id).await;
    StatusCode::OK
}

async fn handle_stream_metrics(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.core.orchestrator.stream(id) {
        Some(pipeline) => (StatusCode::OK, axum::Json(pipeline.metrics_snapshot())).into_response(),
        None => error_response(CoreError::NotConnected),
    }
}

async fn handle_active_streams(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, axum::Json(state.core.orchestrator.active_streams())).into_response()
}

async fn handle_capture_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.core.orchestrator.capture_snapshot(id).await {
        Ok(Some(bytes)) => {
            state.core.persist_snapshot(id, &bytes).await;
            (StatusCode::OK, [(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response()
        }
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_ptz_control(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    axum::Json(req): axum::Json<PtzRequest>,
) -> impl IntoResponse {
    let direction = match parse_direction(&req.direction) {
        Ok(d) => d,
        Err(e) => return error_response(e),
    };
    let result = if req.action == "stop" {
        state.core.orchestrator.ptz_stop(id, direction).await
    } else {
        state.core.orchestrator.ptz_control(id, direction, req.speed).await
    };
    match result {
        Ok(ok) => (StatusCode::OK, axum::Json(serde_json::json!({ "success": ok }))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_ptz_preset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    axum::Json(req): axum::Json<PresetRequest>,
) -> impl IntoResponse {
    let result = if req.action == "set" {
        state.core.orchestrator.ptz_set_preset(id, req.preset_id).await
    } else {
        state.core.orchestrator.ptz_goto_preset(id, req.preset_id).await
    };
    match result {
        Ok(ok) => (StatusCode::OK, axum::Json(serde_json::json!({ "success": ok }))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn handle_orchestrator_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, axum::Json(state.core.orchestrator.metrics())).into_response()
}

async fn handle_start_scan(
    State(state): State<Arc<AppState>>,
    axum::Json(req): axum::Json<StartScanRequest>,
) -> impl IntoResponse {
    if req.start_ip > req.end_ip {
        return error_response(CoreError::Validation("start_ip must be <= end_ip".into()));
    }
    let range = ScanRange::new(req.start_ip, req.end_ip, req.ports);
    let methods = if req.methods.is_empty() {
        vec![ScanMethod::PingSweep, ScanMethod::PortScan, ScanMethod::ProtocolDetect]
    } else {
        req.methods
    };
    let priority = req.priority.unwrap_or(ScanPriority::Normal);
    let scan_id = state.core.scans.start_scan(range, methods, priority, req.use_cache);
    (StatusCode::ACCEPTED, axum::Json(ScanStartedResponse { scan_id })).into_response()
}

async fn handle_cancel_scan(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> impl IntoResponse {
    if state.core.scans.cancel_scan(id) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn handle_scan_status(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.core.scans.scan_status(id) {
        Some(snapshot) => (StatusCode::OK, axum::Json(snapshot)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn handle_scan_results(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.core.scans.scan_results(id) {
        Some(results) => (StatusCode::OK, axum::Json(results)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn handle_optimal_range(
    State(state): State<Arc<AppState>>,
    Query(params): Query<OptimalRangeParams>,
) -> impl IntoResponse {
    match state.core.scans.optimal_scan_range(params.ip) {
        Some(range) => (StatusCode::OK, axum::Json(range)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
