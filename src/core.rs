// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The top-level `Core`: owns every long-lived component and is the single
//! non-global handle `main` and the API layer share (§9: "a single `Core`
//! struct owned by `main`, passed by reference; no hidden globals").
//!
//! Background workers (health/retry loops, scan scheduler/cleanup,
//! persistence cache-cleanup/backup/retention) are started here as explicit
//! tasks, not spawned implicitly by construction.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::camera::{Camera, Capabilities, ProtocolType};
use crate::config::Config;
use crate::connection::{ConnectionOrchestrator, OrchestratorConfig};
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::persistence::{PersistenceConfig, PersistenceCore};
use crate::scan::{ScanCoordinator, ScanCoordinatorConfig};

/// Everything the command/response boundary (§6) needs, assembled once at
/// startup and shared by `Arc` rather than through globals.
pub struct Core {
    pub config: Config,
    pub event_bus: EventBus,
    pub orchestrator: Arc<ConnectionOrchestrator>,
    pub scans: Arc<ScanCoordinator>,
    pub persistence: Arc<PersistenceCore>,
    cameras: RwLock<HashMap<Uuid, Camera>>,
    /// Maps a statically-configured `[[cameras]]` entry's human-chosen
    /// `id` (e.g. the CLI's `--camera` argument) to its generated
    /// `camera_id` UUID.
    entry_ids: RwLock<HashMap<String, Uuid>>,
}

impl Core {
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let event_bus = EventBus::new(std::time::Duration::from_millis(33));

        let persistence = PersistenceCore::open(PersistenceConfig {
            data_root: config.data_root.clone(),
            cache_ttl: std::time::Duration::from_secs(config.persistence.cache_ttl_hours * 3600),
            backup_interval: std::time::Duration::from_secs(config.persistence.backup_interval_hours * 3600),
            auto_cleanup_after: std::time::Duration::from_secs(config.persistence.auto_cleanup_days * 24 * 3600),
            max_backups: config.persistence.max_backups,
            encrypt_config: config.security.encrypt_config,
        })
        .await?;

        let orchestrator = Arc::new(
            ConnectionOrchestrator::new(
                OrchestratorConfig {
                    max_concurrent_connections: config.performance.max_concurrent_connections,
                    max_connections_per_camera: config.performance.max_connections_per_camera,
                    ..OrchestratorConfig::default()
                },
                event_bus.clone(),
            )
            .with_persistence(persistence.clone()),
        );

        let scans = ScanCoordinator::new(
            ScanCoordinatorConfig {
                max_concurrent_scans: config.scan.max_concurrent_scans,
                cache_ttl: std::time::Duration::from_secs(config.scan.cache_expiry_hours * 3600),
                max_cache_entries: config.scan.max_cache_entries,
                history_retention: std::time::Duration::from_secs(
                    config.scan.scan_history_retention_days * 24 * 3600,
                ),
                max_completed_scans: config.scan.max_completed_scans,
                data_dir: config.data_dir(),
                ..ScanCoordinatorConfig::default()
            },
            event_bus.clone(),
            Some(persistence.clone()),
        );

        let mut cameras = HashMap::new();
        let mut entry_ids = HashMap::new();
        for entry in &config.cameras {
            let camera = Camera::from_entry(entry);
            entry_ids.insert(entry.id.clone(), camera.camera_id);
            cameras.insert(camera.camera_id, camera);
        }

        Ok(Arc::new(Self {
            config,
            event_bus,
            orchestrator,
            scans,
            persistence,
            cameras: RwLock::new(cameras),
            entry_ids: RwLock::new(entry_ids),
        }))
    }

    /// Starts every background worker and announces readiness once
    /// (§4.H: `presenter-ready` "once per orchestrator startup").
    pub async fn start(&self) {
        self.orchestrator.start();
        self.scans.start().await;
        self.persistence.start().await;
        self.event_bus.publish(Event::PresenterReady {
            capabilities: Capabilities {
                protocols: vec![ProtocolType::Onvif, ProtocolType::Rtsp, ProtocolType::Http, ProtocolType::Vendor],
                ptz: true,
                audio: false,
                codecs: vec!["H264".into(), "H265".into(), "MJPEG".into()],
            },
        });
        tracing::info!(cameras = self.cameras.read().len(), "core started");
    }

    /// Stops every background worker and drains connections with the
    /// orchestrator's bounded timeout.
    pub async fn stop(&self) {
        self.orchestrator.stop().await;
        self.scans.stop().await;
        self.persistence.stop();
        tracing::info!("core stopped");
    }

    pub fn camera(&self, camera_id: Uuid) -> Option<Camera> {
        self.cameras.read().get(&camera_id).cloned()
    }

    /// Resolves a statically-configured `[[cameras]]` entry's `id` (as
    /// named in a config file or CLI argument) to its runtime `camera_id`.
    pub fn camera_by_entry_id(&self, entry_id: &str) -> Option<Camera> {
        let camera_id = *self.entry_ids.read().get(entry_id)?;
        self.camera(camera_id)
    }

    pub fn cameras(&self) -> Vec<Camera> {
        self.cameras.read().values().cloned().collect()
    }

    pub fn upsert_camera(&self, camera: Camera) {
        self.cameras.write().insert(camera.camera_id, camera);
    }

    /// Writes a captured snapshot to `config.snapshots_dir(camera_id)` and
    /// records its metadata in the `snapshots` table (§2 control flow:
    /// "Persistence Core (G) is consulted/updated by ... (C) for snapshot
    /// metadata"). Best-effort: the caller already has the bytes it asked
    /// for, so a disk or DB failure here is logged, not propagated (§7).
    pub async fn persist_snapshot(&self, camera_id: Uuid, bytes: &[u8]) {
        let dir = self.config.snapshots_dir(&camera_id.to_string());
        if let Err(err) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!(%camera_id, error = %err, "failed to create snapshot directory");
            return;
        }
        let filename = format!("{}.jpg", chrono::Utc::now().format("%Y%m%d_%H%M%S%.3f"));
        let path = dir.join(&filename);
        if let Err(err) = tokio::fs::write(&path, bytes).await {
            tracing::warn!(%camera_id, error = %err, "failed to write snapshot file");
            return;
        }
        let record = self
            .persistence
            .record_snapshot(
                &camera_id.to_string(),
                &path.display().to_string(),
                bytes.len() as i64,
                "unknown",
                "jpeg",
                serde_json::json!({}),
            )
            .await;
        if let Err(err) = record {
            tracing::warn!(%camera_id, error = %err, "failed to record snapshot metadata");
        }
    }

    /// Registers a camera discovered by the scan coordinator as a
    /// candidate the orchestrator can subsequently connect to (§2 control
    /// flow: "discoveries surface as candidate cameras offered back to
    /// (D)").
    pub fn register_discovered(&self, camera: Camera) -> Uuid {
        let camera_id = camera.camera_id;
        self.cameras.write().insert(camera_id, camera);
        camera_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    async fn test_core() -> Arc<Core> {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default_for_tests(dir.path().to_path_buf());
        config.api.enabled = false;
        let core = Core::new(config).await.unwrap();
        std::mem::forget(dir);
        core
    }

    #[tokio::test]
    async fn start_then_stop_is_idempotent() {
        let core = test_core().await;
        core.start().await;
        core.start().await;
        core.stop().await;
        core.stop().await;
    }

    #[tokio::test]
    async fn presenter_ready_emitted_once_on_start() {
        use crate::events::MockSink;

        let core = test_core().await;
        let sink = MockSink::new();
        sink.attach(&core.event_bus);
        core.start().await;
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        let ready: Vec<_> = sink.filter_by_topic("presenter-ready");
        assert_eq!(ready.len(), 1);
        core.stop().await;
    }
}
