// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Read-through/write-through TTL cache in front of the camera table.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::db::{CameraRecord, Database};
use crate::error::Result;

struct Entry {
    record: CameraRecord,
    cached_at: Instant,
}

/// Caches `CameraRecord`s for `ttl`. Reads fall through to the database
/// on a miss or expiry and repopulate the cache; writes update both.
pub struct CameraCache {
    db: Database,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl CameraCache {
    pub fn new(db: Database, ttl: Duration) -> Self {
        Self {
            db,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, camera_id: &str) -> Result<Option<CameraRecord>> {
        if let Some(entry) = self.entries.lock().get(camera_id) {
            if entry.cached_at.elapsed() <= self.ttl {
                return Ok(Some(entry.record.clone()));
            }
        }

        let fetched = self.db.get_camera(camera_id).await?;
        if let Some(record) = &fetched {
            self.entries.lock().insert(
                camera_id.to_string(),
                Entry {
                    record: record.clone(),
                    cached_at: Instant::now(),
                },
            );
        } else {
            self.entries.lock().remove(camera_id);
        }
        Ok(fetched)
    }

    pub async fn put(&self, record: CameraRecord) -> Result<()> {
        self.db.upsert_camera(&record).await?;
        self.entries.lock().insert(
            record.camera_id.clone(),
            Entry {
                record,
                cached_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Evicts expired entries; does not touch the database.
    pub fn evict_expired(&self) {
        let ttl = self.ttl;
        self.entries.lock().retain(|_, entry| entry.cached_at.elapsed() <= ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(id: &str) -> CameraRecord {
        let now = chrono::Utc::now();
        CameraRecord {
            camera_id: id.into(),
            brand: "dahua".into(),
            model: "ipc".into(),
            ip: "10.0.0.5".into(),
            last_seen: now,
            connection_count: 0,
            successful_connections: 0,
            failed_connections: 0,
            total_uptime_minutes: 0,
            snapshots_count: 0,
            protocols: json!([]),
            metadata: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn put_then_get_hits_cache_without_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(&dir.path().join("camera_data.db")).await.unwrap();
        let cache = CameraCache::new(db, Duration::from_secs(3600));

        cache.put(sample("cam-1")).await.unwrap();
        assert_eq!(cache.len(), 1);
        let fetched = cache.get("cam-1").await.unwrap().unwrap();
        assert_eq!(fetched.camera_id, "cam-1");
    }

    #[tokio::test]
    async fn expired_entry_falls_through_to_db() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(&dir.path().join("camera_data.db")).await.unwrap();
        let cache = CameraCache::new(db, Duration::from_millis(1));

        cache.put(sample("cam-2")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.evict_expired();
        assert!(cache.is_empty());

        let fetched = cache.get("cam-2").await.unwrap();
        assert!(fetched.is_some());
    }
}
