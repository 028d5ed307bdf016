// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Connection Orchestrator (§4.D): owns the `camera_id → Connection` map,
//! builds protocol handlers from a [`Camera`] record, and runs the health
//! and retry supervisor loops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::camera::{Camera, ProtocolType};
use crate::connection::model::{Connection, ConnectionCallbacks, ConnectionKind, ConnectionState, ConnectionStats};
use crate::error::{CoreError, Result};
use crate::events::{Event, EventBus};
use crate::persistence::{CameraRecord, PersistenceCore};
use crate::protocol::onvif::OnvifHandler;
use crate::protocol::rtsp::RtspHandler;
use crate::protocol::vendor_http::VendorHttpHandler;
use crate::protocol::{ProtocolHandler, PtzDirection};
use crate::stream::pipeline::StreamPipeline;

/// One `(camera_id, kind)` entry in the orchestrator's connection map.
type ConnectionKey = (Uuid, ConnectionKind);

/// Result of a batch connect/disconnect (§4.D: `connect_many`).
#[derive(Debug, Clone, Serialize)]
pub struct BatchOperation {
    pub op_id: Uuid,
    pub results: Vec<Uuid>,
    pub errors: HashMap<Uuid, String>,
    pub success_rate: f64,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_connections: usize,
    pub max_connections_per_camera: usize,
    pub health_check_interval: Duration,
    pub retry_interval: Duration,
    pub retry_failed_connections: bool,
    pub callback_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_connections: 50,
            max_connections_per_camera: 4,
            health_check_interval: Duration::from_secs(30),
            retry_interval: Duration::from_secs(60),
            retry_failed_connections: true,
            callback_timeout: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorMetrics {
    pub active_by_protocol: HashMap<String, usize>,
    pub total_connections: usize,
    pub avg_response_time_ms: f64,
    pub uptime_percent: f64,
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

/// Builds a protocol handler for a camera record (§4.A handler factory).
fn build_handler(camera: &Camera) -> Box<dyn ProtocolHandler> {
    let channel = camera.stream.channel;
    match camera.capabilities.protocols.first().copied().unwrap_or(ProtocolType::Rtsp) {
        ProtocolType::Onvif => Box::new(OnvifHandler::new(camera.camera_id, &camera.vendor, camera.connection.clone(), channel)),
        ProtocolType::Rtsp => Box::new(RtspHandler::new(camera.camera_id, &camera.vendor, camera.connection.clone(), channel)),
        ProtocolType::Http | ProtocolType::Vendor => {
            Box::new(VendorHttpHandler::new(camera.camera_id, camera.connection.clone(), channel))
        }
    }
}

struct Entry {
    camera: Camera,
    connection: Arc<Connection>,
}

/// Owns every `Connection` for every registered camera and the two
/// supervisor loops that keep them healthy.
pub struct ConnectionOrchestrator {
    config: OrchestratorConfig,
    event_bus: EventBus,
    connections: Arc<RwLock<HashMap<ConnectionKey, Entry>>>,
    streams: Arc<RwLock<HashMap<Uuid, Arc<StreamPipeline>>>>,
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicBool>,
    supervisor_tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    persistence: Option<Arc<PersistenceCore>>,
}

impl ConnectionOrchestrator {
    pub fn new(config: OrchestratorConfig, event_bus: EventBus) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_connections));
        Self {
            config,
            event_bus,
            connections: Arc::new(RwLock::new(HashMap::new())),
            streams: Arc::new(RwLock::new(HashMap::new())),
            semaphore,
            running: Arc::new(AtomicBool::new(false)),
            supervisor_tasks: parking_lot::Mutex::new(Vec::new()),
            persistence: None,
        }
    }

    /// Attaches the Persistence Core so `connect_camera`/`disconnect_camera`
    /// can update the `cameras` table's connection-count/last-seen
    /// bookkeeping (§2 control flow: "Persistence Core (G) is
    /// consulted/updated by (D)..."). Optional: orchestrators built without
    /// it (e.g. in unit tests) simply skip persistence.
    pub fn with_persistence(mut self, persistence: Arc<PersistenceCore>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Idempotent: starting an already-running orchestrator is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("connection orchestrator starting");
        let health_task = self.spawn_health_loop();
        let retry_task = self.spawn_retry_loop();
        let mut tasks = self.supervisor_tasks.lock();
        tasks.push(health_task);
        if let Some(retry_task) = retry_task {
            tasks.push(retry_task);
        }
    }

    /// Idempotent: drains all connections with a bounded timeout per §4.D.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for task in self.supervisor_tasks.lock().drain(..) {
            task.abort();
        }
        for pipeline in self.streams.write().drain().map(|(_, p)| p).collect::<Vec<_>>() {
            pipeline.stop();
        }
        self.disconnect_all().await;
        info!("connection orchestrator stopped");
    }

    /// Idempotent per `(camera_id, kind)`: returns immediately if already
    /// `Connected`, otherwise constructs and connects under the global
    /// semaphore.
    pub async fn connect_camera(&self, camera: Camera, kind: ConnectionKind) -> Result<()> {
        let key = (camera.camera_id, kind);
        let existing = {
            let map = self.connections.read();
            map.get(&key).map(|entry| entry.connection.clone())
        };
        if let Some(conn) = existing {
            if conn.state() == ConnectionState::Connected {
                return Ok(());
            }
            let result = self.connect_with_permit(conn).await;
            self.record_connection_outcome(&camera, result.is_ok()).await;
            return result;
        }

        let existing_for_camera = {
            let map = self.connections.read();
            map.keys().filter(|(id, _)| *id == camera.camera_id).count()
        };
        if existing_for_camera >= self.config.max_connections_per_camera {
            return Err(CoreError::Validation(format!(
                "camera {} already holds {} connections (limit {})",
                camera.camera_id, existing_for_camera, self.config.max_connections_per_camera
            )));
        }

        let handler = build_handler(&camera);
        let camera_id = camera.camera_id;
        let bus = self.event_bus.clone();
        let bus_lost = bus.clone();
        let callbacks = ConnectionCallbacks {
            on_state_changed: Some(Arc::new(move |old, new| {
                info!(%camera_id, %old, %new, "connection state transition");
            })),
            on_connection_lost: Some(Arc::new(move |reason| {
                bus_lost.publish(Event::StreamStatus {
                    camera_id,
                    status: "lost".into(),
                    details: Some(reason.to_string()),
                });
            })),
            on_connection_restored: Some(Arc::new(move || {
                bus.publish(Event::StreamStatus { camera_id, status: "restored".into(), details: None });
            })),
        };

        let connection = Arc::new(Connection::new(
            camera.camera_id,
            camera.capabilities.protocols.first().copied().unwrap_or(ProtocolType::Rtsp),
            kind,
            handler,
            camera.connection.retry_policy,
            callbacks,
        ));

        self.connections.write().insert(key, Entry { camera: camera.clone(), connection: connection.clone() });
        let result = self.connect_with_permit(connection).await;
        self.record_connection_outcome(&camera, result.is_ok()).await;
        result
    }

    async fn connect_with_permit(&self, connection: Arc<Connection>) -> Result<()> {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Cancelled)?;
        connection.connect().await
    }

    /// Tears down every connection registered for `camera_id`.
    pub async fn disconnect_camera(&self, camera_id: Uuid) {
        let entries: Vec<(Camera, Arc<Connection>)> = {
            let mut map = self.connections.write();
            let keys: Vec<ConnectionKey> = map.keys().filter(|(id, _)| *id == camera_id).cloned().collect();
            keys.into_iter().filter_map(|k| map.remove(&k).map(|e| (e.camera, e.connection))).collect()
        };
        for (camera, conn) in entries {
            conn.disconnect().await;
            self.record_camera_seen(&camera).await;
        }
    }

    /// Upserts the `cameras` row's connection-count/last-seen bookkeeping
    /// after a `connect_camera` attempt. Logged and swallowed on failure
    /// (§7: "persistence errors in background workers are logged and do
    /// not stop the core") — a camera that fails to connect must not also
    /// fail to report that failure to the caller.
    async fn record_connection_outcome(&self, camera: &Camera, success: bool) {
        let Some(persistence) = &self.persistence else { return };
        let db = persistence.database();
        let camera_id = camera.camera_id.to_string();
        let now = chrono::Utc::now();
        let existing = db.get_camera(&camera_id).await.ok().flatten();
        let (connection_count, successful_connections, failed_connections, created_at, snapshots_count, total_uptime_minutes) =
            match &existing {
                Some(r) => (
                    r.connection_count + 1,
                    r.successful_connections + success as i64,
                    r.failed_connections + (!success) as i64,
                    r.created_at,
                    r.snapshots_count,
                    r.total_uptime_minutes,
                ),
                None => (1, success as i64, (!success) as i64, now, 0, 0),
            };
        let record = CameraRecord {
            camera_id,
            brand: camera.vendor.clone(),
            model: camera.model.clone(),
            ip: camera.connection.ip.clone(),
            last_seen: now,
            connection_count,
            successful_connections,
            failed_connections,
            total_uptime_minutes,
            snapshots_count,
            protocols: serde_json::to_value(&camera.capabilities.protocols).unwrap_or_else(|_| serde_json::json!([])),
            metadata: serde_json::to_value(&camera.metadata).unwrap_or_else(|_| serde_json::json!({})),
            created_at,
            updated_at: now,
        };
        if let Err(err) = db.upsert_camera(&record).await {
            warn!(camera_id = %camera.camera_id, error = %err, "failed to persist camera connection outcome");
        }
    }

    /// Touches `last_seen`/`updated_at` on disconnect without disturbing the
    /// connection-count bookkeeping `record_connection_outcome` owns. A
    /// no-op (not an error) when the camera was never persisted, matching
    /// `disconnect_camera`'s idempotent-on-unknown-camera invariant.
    async fn record_camera_seen(&self, camera: &Camera) {
        let Some(persistence) = &self.persistence else { return };
        let db = persistence.database();
        let camera_id = camera.camera_id.to_string();
        let Ok(Some(mut record)) = db.get_camera(&camera_id).await else { return };
        record.last_seen = chrono::Utc::now();
        record.updated_at = record.last_seen;
        if let Err(err) = db.upsert_camera(&record).await {
            warn!(camera_id = %camera.camera_id, error = %err, "failed to persist camera disconnect bookkeeping");
        }
    }

    /// Batch connect (§4.D: `connect_many`), all under the same semaphore.
    /// Requires the orchestrator to be held behind an `Arc` since each
    /// camera's connect runs as its own concurrent task.
    pub async fn connect_many(self: &Arc<Self>, cameras: Vec<Camera>) -> BatchOperation {
        let op_id = Uuid::new_v4();
        let mut results = Vec::new();
        let mut errors = HashMap::new();

        let mut set = tokio::task::JoinSet::new();
        for camera in cameras {
            let orchestrator = self.clone();
            let camera_id = camera.camera_id;
            set.spawn(async move { (camera_id, orchestrator.connect_camera(camera, ConnectionKind::Stream).await) });
        }
        let mut outcomes = Vec::new();
        while let Some(res) = set.join_next().await {
            if let Ok(pair) = res {
                outcomes.push(pair);
            }
        }

        for (camera_id, outcome) in outcomes {
            match outcome {
                Ok(()) => results.push(camera_id),
                Err(e) => {
                    errors.insert(camera_id, e.to_string());
                }
            }
        }

        let total = results.len() + errors.len();
        let success_rate = if total == 0 { 0.0 } else { 100.0 * results.len() as f64 / total as f64 };
        BatchOperation { op_id, results, errors, success_rate }
    }

    /// Batch disconnect over every currently-registered camera.
    pub async fn disconnect_all(&self) {
        let entries: Vec<Arc<Connection>> = {
            let mut map = self.connections.write();
            map.drain().map(|(_, e)| e.connection).collect()
        };
        for conn in entries {
            conn.disconnect().await;
        }
    }

    fn connection_for(&self, camera_id: Uuid, kind: ConnectionKind) -> Option<Arc<Connection>> {
        self.connections.read().get(&(camera_id, kind)).map(|e| e.connection.clone())
    }

    /// Any connection registered for `camera_id`, preferring `Stream` (video
    /// path) then `Control` (PTZ/CGI path) — used by operations that don't
    /// care which kind answers, such as snapshot capture and PTZ.
    fn any_connection(&self, camera_id: Uuid) -> Option<Arc<Connection>> {
        self.connection_for(camera_id, ConnectionKind::Stream)
            .or_else(|| self.connection_for(camera_id, ConnectionKind::Control))
            .or_else(|| self.connection_for(camera_id, ConnectionKind::Api))
    }

    /// Starts producing frames for `camera_id`: ensures a `Stream` connection
    /// exists and is connected, wires a [`StreamPipeline`] as its frame sink,
    /// then runs `start_streaming()` (§2 control flow: D → B → A → C).
    /// Idempotent — returns the existing pipeline if the camera is already
    /// streaming.
    pub async fn start_stream(&self, camera: Camera, buffer_size: usize) -> Result<Arc<StreamPipeline>> {
        let camera_id = camera.camera_id;
        if let Some(existing) = self.streams.read().get(&camera_id).cloned() {
            return Ok(existing);
        }

        let target_fps = camera.stream.target_fps;
        self.connect_camera(camera, ConnectionKind::Stream).await?;
        let connection = self
            .connection_for(camera_id, ConnectionKind::Stream)
            .ok_or(CoreError::NotConnected)?;

        let pipeline = StreamPipeline::new(camera_id, target_fps, buffer_size, self.event_bus.clone());
        let sink_pipeline = pipeline.clone();
        connection.set_frame_sink(Arc::new(move |data| sink_pipeline.push_frame(data))).await;

        if let Err(e) = connection.start_streaming().await {
            pipeline.stop();
            return Err(e);
        }

        self.streams.write().insert(camera_id, pipeline.clone());
        Ok(pipeline)
    }

    /// Stops producing frames for `camera_id`; the underlying connection
    /// stays `Connected`. A no-op if the camera isn't currently streaming.
    pub async fn stop_stream(&self, camera_id: Uuid) {
        let pipeline = { self.streams.write().remove(&camera_id) };
        let Some(pipeline) = pipeline else { return };
        pipeline.stop();
        if let Some(connection) = self.connection_for(camera_id, ConnectionKind::Stream) {
            let _ = connection.stop_streaming().await;
        }
    }

    pub fn stream(&self, camera_id: Uuid) -> Option<Arc<StreamPipeline>> {
        self.streams.read().get(&camera_id).cloned()
    }

    /// `camera_id`s of every currently-active stream.
    pub fn active_streams(&self) -> Vec<Uuid> {
        self.streams.read().keys().copied().collect()
    }

    /// Capture a still image over whichever connection is available for
    /// `camera_id` (§4.A `capture_snapshot`).
    pub async fn capture_snapshot(&self, camera_id: Uuid) -> Result<Option<bytes::Bytes>> {
        let connection = self.any_connection(camera_id).ok_or(CoreError::NotConnected)?;
        connection.capture_snapshot().await
    }

    /// PTZ move (§4.A / §6 vendor-HTTP action table), routed to whichever
    /// connection answers for `camera_id`.
    pub async fn ptz_control(&self, camera_id: Uuid, direction: PtzDirection, speed: u8) -> Result<bool> {
        let connection = self.any_connection(camera_id).ok_or(CoreError::NotConnected)?;
        connection.ptz_move(direction, speed).await
    }

    /// The fixed "stop" action of the vendor-HTTP PTZ table (§4.A).
    pub async fn ptz_stop(&self, camera_id: Uuid, direction: PtzDirection) -> Result<bool> {
        let connection = self.any_connection(camera_id).ok_or(CoreError::NotConnected)?;
        connection.ptz_stop(direction).await
    }

    pub async fn ptz_set_preset(&self, camera_id: Uuid, preset_id: u8) -> Result<bool> {
        let connection = self.any_connection(camera_id).ok_or(CoreError::NotConnected)?;
        connection.set_preset(preset_id).await
    }

    pub async fn ptz_goto_preset(&self, camera_id: Uuid, preset_id: u8) -> Result<bool> {
        let connection = self.any_connection(camera_id).ok_or(CoreError::NotConnected)?;
        connection.goto_preset(preset_id).await
    }

    pub fn connection_stats(&self, camera_id: Uuid, kind: ConnectionKind) -> Option<ConnectionStats> {
        self.connections.read().get(&(camera_id, kind)).map(|e| e.connection.stats())
    }

    pub fn all_stats(&self) -> Vec<ConnectionStats> {
        self.connections.read().values().map(|e| e.connection.stats()).collect()
    }

    /// The camera record registered alongside a connection, if any.
    pub fn camera(&self, camera_id: Uuid, kind: ConnectionKind) -> Option<Camera> {
        self.connections.read().get(&(camera_id, kind)).map(|e| e.camera.clone())
    }

    /// All cameras currently registered with at least one connection,
    /// deduplicated by `camera_id`.
    pub fn active_cameras(&self) -> Vec<Camera> {
        let mut seen: HashMap<Uuid, Camera> = HashMap::new();
        for entry in self.connections.read().values() {
            seen.entry(entry.camera.camera_id).or_insert_with(|| entry.camera.clone());
        }
        seen.into_values().collect()
    }

    /// Aggregate metrics (§4.D: "active counts per protocol, avg response
    /// time, uptime%, last-updated").
    pub fn metrics(&self) -> OrchestratorMetrics {
        let map = self.connections.read();
        let mut active_by_protocol: HashMap<String, usize> = HashMap::new();
        let mut response_times = Vec::new();
        let mut alive_count = 0usize;
        let total = map.len();

        for entry in map.values() {
            let stats = entry.connection.stats();
            if matches!(stats.state, ConnectionState::Connected | ConnectionState::Streaming) {
                *active_by_protocol.entry(stats.protocol.to_string()).or_default() += 1;
            }
            if stats.health.alive {
                alive_count += 1;
            }
            if stats.health.avg_response_time_ms > 0.0 {
                response_times.push(stats.health.avg_response_time_ms);
            }
        }

        let avg_response_time_ms = if response_times.is_empty() {
            0.0
        } else {
            response_times.iter().sum::<f64>() / response_times.len() as f64
        };
        let uptime_percent = if total == 0 { 0.0 } else { (alive_count as f64 / total as f64) * 100.0 };

        OrchestratorMetrics {
            active_by_protocol,
            total_connections: total,
            avg_response_time_ms,
            uptime_percent,
            last_updated: Some(chrono::Utc::now()),
        }
    }

    fn spawn_health_loop(&self) -> JoinHandle<()> {
        let connections = self.connections.clone();
        let running = self.running.clone();
        let interval = self.config.health_check_interval;
        let callback_timeout = self.config.callback_timeout;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                let conns: Vec<Arc<Connection>> = connections.read().values().map(|e| e.connection.clone()).collect();
                for conn in conns {
                    let started = Instant::now();
                    if timeout(callback_timeout.max(Duration::from_secs(5)), conn.run_health_check()).await.is_err() {
                        warn!(elapsed_ms = started.elapsed().as_millis() as u64, "health check exceeded its timeout");
                    }
                }
            }
        })
    }

    fn spawn_retry_loop(&self) -> Option<JoinHandle<()>> {
        if !self.config.retry_failed_connections {
            return None;
        }
        let connections = self.connections.clone();
        let running = self.running.clone();
        let interval = self.config.retry_interval;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                let conns: Vec<Arc<Connection>> = connections
                    .read()
                    .values()
                    .map(|e| e.connection.clone())
                    .filter(|c| c.state() == ConnectionState::Error)
                    .collect();
                for conn in conns {
                    if let Err(e) = conn.connect().await {
                        warn!(error = %e, "retry loop failed to restore connection");
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Capabilities, ConnectionConfig};

    fn camera_with_protocol(protocol: ProtocolType) -> Camera {
        let mut cam = Camera::new("Generic", "Cam", "10.0.0.5");
        cam.connection = ConnectionConfig { username: "admin".into(), password: "pw".into(), ..ConnectionConfig::default() };
        cam.capabilities = Capabilities { protocols: vec![protocol], ..Capabilities::default() };
        cam
    }

    #[test]
    fn handler_factory_dispatches_on_first_protocol() {
        let cam = camera_with_protocol(ProtocolType::Rtsp);
        let handler = build_handler(&cam);
        assert!(handler.capabilities().protocols.contains(&ProtocolType::Rtsp));
    }

    #[tokio::test]
    async fn connect_many_reports_success_rate_over_total() {
        let orchestrator = Arc::new(ConnectionOrchestrator::new(
            OrchestratorConfig::default(),
            EventBus::new(Duration::from_millis(0)),
        ));
        // No reachable cameras in a unit test environment: every connect fails,
        // so success_rate must be exactly 0.0 over a non-empty batch.
        let cameras = vec![camera_with_protocol(ProtocolType::Rtsp), camera_with_protocol(ProtocolType::Rtsp)];
        let batch = orchestrator.connect_many(cameras).await;
        assert_eq!(batch.results.len() + batch.errors.len(), 2);
        assert!(batch.success_rate <= 100.0);
    }

    /// S3 (spec scenario): `errors[C2]` must contain the literal substring
    /// "Auth" for a camera whose `connect` fails with `CoreError::Auth`.
    #[tokio::test]
    async fn connect_many_auth_failure_error_contains_auth_marker() {
        let orchestrator = Arc::new(ConnectionOrchestrator::new(
            OrchestratorConfig::default(),
            EventBus::new(Duration::from_millis(0)),
        ));
        let mut cam = camera_with_protocol(ProtocolType::Onvif);
        cam.connection.username = String::new();
        cam.connection.retry_policy = crate::camera::RetryPolicy { max_retries: 0, retry_delay: Duration::from_millis(1) };
        let camera_id = cam.camera_id;

        let batch = orchestrator.connect_many(vec![cam]).await;
        assert!(batch.results.is_empty());
        let error = batch.errors.get(&camera_id).expect("expected a recorded auth failure");
        assert!(error.contains("Auth"), "error message {error:?} does not contain 'Auth'");
    }

    #[test]
    fn default_config_matches_performance_section_defaults() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.max_concurrent_connections, 50);
        assert_eq!(cfg.max_connections_per_camera, 4);
    }

    #[tokio::test]
    async fn start_stream_fails_closed_when_connect_fails() {
        let orchestrator = ConnectionOrchestrator::new(
            OrchestratorConfig::default(),
            EventBus::new(Duration::from_millis(0)),
        );
        let cam = camera_with_protocol(ProtocolType::Rtsp);
        let result = orchestrator.start_stream(cam, 5).await;
        assert!(result.is_err());
        assert!(orchestrator.active_streams().is_empty());
    }

    #[tokio::test]
    async fn ptz_on_unregistered_camera_is_not_connected_error() {
        let orchestrator = ConnectionOrchestrator::new(
            OrchestratorConfig::default(),
            EventBus::new(Duration::from_millis(0)),
        );
        let err = orchestrator
            .ptz_control(Uuid::new_v4(), crate::protocol::PtzDirection::Left, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotConnected));
    }
}
