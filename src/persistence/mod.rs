// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Persistence Core (§4.G): sqlite-backed camera/scan/snapshot/config
//! storage, a TTL read-through cache, encrypted credential storage, and
//! the background cache-cleanup/backup/retention workers.

pub mod backup;
pub mod cache;
pub mod crypto;
pub mod db;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as Json;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::error::{CoreError, Result};

pub use cache::CameraCache;
pub use crypto::CredentialCipher;
pub use db::{CameraRecord, ConfigurationRecord, Database, ScanRecord, SnapshotRecord};

use crate::config::ConfigValue;

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub data_root: PathBuf,
    pub cache_ttl: Duration,
    pub backup_interval: Duration,
    pub auto_cleanup_after: Duration,
    pub max_backups: usize,
    pub encrypt_config: bool,
}

/// Facade wiring the database, cache and crypto layers together with
/// the background workers that keep them within bounds.
pub struct PersistenceCore {
    config: PersistenceConfig,
    db: Database,
    cache: Arc<CameraCache>,
    cipher: Option<CredentialCipher>,
    running: Arc<AtomicBool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl PersistenceCore {
    pub async fn open(config: PersistenceConfig) -> Result<Arc<Self>> {
        let db_path = config.data_root.join("data").join("camera_data.db");
        let db = Database::connect(&db_path).await?;
        let cache = Arc::new(CameraCache::new(db.clone(), config.cache_ttl));

        let cipher = if config.encrypt_config {
            match CredentialCipher::open(&config.data_root) {
                Ok(cipher) => Some(cipher),
                Err(err) => {
                    tracing::warn!(error = %err, "credential encryption unavailable, sensitive values will be refused");
                    None
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Self {
            config,
            db,
            cache,
            cipher,
            running: Arc::new(AtomicBool::new(false)),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn cache(&self) -> &CameraCache {
        &self.cache
    }

    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let cache_cleanup = {
            let this = self.clone();
            tokio::spawn(async move {
                let mut ticker = interval(Duration::from_secs(3600));
                while this.running.load(Ordering::SeqCst) {
                    ticker.tick().await;
                    this.cache.evict_expired();
                }
            })
        };

        let backup_loop = {
            let this = self.clone();
            tokio::spawn(async move {
                let mut ticker = interval(this.config.backup_interval);
                while this.running.load(Ordering::SeqCst) {
                    ticker.tick().await;
                    if let Err(err) = this.run_backup() {
                        tracing::warn!(error = %err, "scheduled backup failed");
                    }
                }
            })
        };

        let retention_loop = {
            let this = self.clone();
            tokio::spawn(async move {
                let mut ticker = interval(Duration::from_secs(24 * 3600));
                while this.running.load(Ordering::SeqCst) {
                    ticker.tick().await;
                    let cutoff = Utc::now()
                        - chrono::Duration::from_std(this.config.auto_cleanup_after)
                            .unwrap_or_else(|_| chrono::Duration::zero());
                    match this.db.delete_older_than(cutoff).await {
                        Ok((scans, snapshots)) => {
                            if scans > 0 || snapshots > 0 {
                                tracing::info!(scans, snapshots, "retention sweep removed stale rows");
                            }
                        }
                        Err(err) => tracing::warn!(error = %err, "retention sweep failed"),
                    }
                }
            })
        };

        self.tasks.lock().extend([cache_cleanup, backup_loop, retention_loop]);
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    fn run_backup(&self) -> Result<PathBuf> {
        let db_path = self.config.data_root.join("data").join("camera_data.db");
        let backups_dir = self.config.data_root.join("data").join("backups");
        backup::run_backup(&db_path, &backups_dir, self.config.max_backups)
    }

    pub async fn record_snapshot(
        &self,
        camera_id: &str,
        file_path: &str,
        file_size_bytes: i64,
        resolution: &str,
        format: &str,
        metadata: Json,
    ) -> Result<String> {
        let snapshot_id = uuid::Uuid::new_v4().to_string();
        let record = SnapshotRecord {
            snapshot_id: snapshot_id.clone(),
            camera_id: camera_id.to_string(),
            file_path: file_path.to_string(),
            timestamp: Utc::now(),
            file_size_bytes,
            resolution: resolution.to_string(),
            format: format.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        self.db.insert_snapshot(&record).await?;
        Ok(snapshot_id)
    }

    pub async fn record_scan(&self, record: ScanRecord) -> Result<()> {
        self.db.insert_scan(&record).await
    }

    /// Stores a typed config value. Password-typed values are refused
    /// (fail-closed) unless encryption is configured and available.
    pub async fn set_config(
        &self,
        key: &str,
        value: &ConfigValue,
        description: Option<String>,
    ) -> Result<()> {
        value.validate()?;

        let stored_value = if value.is_sensitive() {
            let plaintext = match value {
                ConfigValue::Password(s) => s.clone(),
                _ => unreachable!(),
            };
            let cipher = self.cipher.as_ref().ok_or_else(|| {
                CoreError::Config(
                    "refusing to persist sensitive config value: encryption unavailable".into(),
                )
            })?;
            cipher.encrypt(&plaintext)?
        } else {
            serde_json::to_string(value)
                .map_err(|e| CoreError::Config(format!("failed to serialize config value: {e}")))?
        };

        let now = Utc::now();
        let existing = self.db.get_configuration(key).await?;
        let created_at = existing.map(|e| e.created_at).unwrap_or(now);

        self.db
            .upsert_configuration(&ConfigurationRecord {
                config_key: key.to_string(),
                config_value: stored_value,
                config_type: value.type_tag().to_string(),
                description,
                created_at,
                updated_at: now,
            })
            .await
    }

    pub async fn get_config(&self, key: &str) -> Result<Option<ConfigValue>> {
        let Some(record) = self.db.get_configuration(key).await? else {
            return Ok(None);
        };

        if record.config_type == "password" {
            let cipher = self.cipher.as_ref().ok_or_else(|| {
                CoreError::Config("cannot decrypt stored credential: encryption unavailable".into())
            })?;
            let plaintext = cipher.decrypt(&record.config_value)?;
            return Ok(Some(ConfigValue::Password(plaintext)));
        }

        let value = serde_json::from_str(&record.config_value)
            .map_err(|e| CoreError::Config(format!("corrupt stored config value: {e}")))?;
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn core(encrypt: bool) -> Arc<PersistenceCore> {
        let dir = tempfile::tempdir().unwrap();
        let config = PersistenceConfig {
            data_root: dir.path().to_path_buf(),
            cache_ttl: Duration::from_secs(3600),
            backup_interval: Duration::from_secs(3600),
            auto_cleanup_after: Duration::from_secs(30 * 24 * 3600),
            max_backups: 10,
            encrypt_config: encrypt,
        };
        let core = PersistenceCore::open(config).await.unwrap();
        // keep the tempdir alive for the duration of the test by leaking it;
        // acceptable in a short-lived unit test.
        std::mem::forget(dir);
        core
    }

    #[tokio::test]
    async fn plain_config_value_round_trips() {
        let core = core(false).await;
        core.set_config("network.timeout", &ConfigValue::Int(5), None)
            .await
            .unwrap();
        let fetched = core.get_config("network.timeout").await.unwrap().unwrap();
        assert_eq!(fetched, ConfigValue::Int(5));
    }

    #[tokio::test]
    async fn password_value_is_refused_without_encryption() {
        let core = core(false).await;
        let result = core
            .set_config("dahua.password", &ConfigValue::Password("secret".into()), None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn password_value_round_trips_encrypted_at_rest() {
        let core = core(true).await;
        core.set_config("dahua.password", &ConfigValue::Password("secret".into()), None)
            .await
            .unwrap();

        let raw = core
            .database()
            .get_configuration("dahua.password")
            .await
            .unwrap()
            .unwrap();
        assert_ne!(raw.config_value, "secret");

        let fetched = core.get_config("dahua.password").await.unwrap().unwrap();
        assert_eq!(fetched, ConfigValue::Password("secret".into()));
    }
}
