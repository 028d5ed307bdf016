// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! SQLite-backed store for camera/scan/snapshot/configuration records (§4.G).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraRecord {
    pub camera_id: String,
    pub brand: String,
    pub model: String,
    pub ip: String,
    pub last_seen: DateTime<Utc>,
    pub connection_count: i64,
    pub successful_connections: i64,
    pub failed_connections: i64,
    pub total_uptime_minutes: i64,
    pub snapshots_count: i64,
    pub protocols: Json,
    pub metadata: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub scan_id: String,
    pub target_ip: String,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: f64,
    pub ports_scanned: i64,
    pub ports_found: i64,
    pub authentication_tested: bool,
    pub successful_auths: i64,
    pub protocols_detected: Json,
    pub results: Json,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub snapshot_id: String,
    pub camera_id: String,
    pub file_path: String,
    pub timestamp: DateTime<Utc>,
    pub file_size_bytes: i64,
    pub resolution: String,
    pub format: String,
    pub metadata: Json,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    pub config_key: String,
    pub config_value: String,
    pub config_type: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Owns the sqlite connection pool and schema. Cheaply cloneable — the
/// pool internally multiplexes connections.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))
            .map_err(|e| CoreError::Storage(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cameras (
                camera_id TEXT PRIMARY KEY,
                brand TEXT NOT NULL,
                model TEXT NOT NULL,
                ip TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                connection_count INTEGER NOT NULL DEFAULT 0,
                successful_connections INTEGER NOT NULL DEFAULT 0,
                failed_connections INTEGER NOT NULL DEFAULT 0,
                total_uptime_minutes INTEGER NOT NULL DEFAULT 0,
                snapshots_count INTEGER NOT NULL DEFAULT 0,
                protocols TEXT NOT NULL DEFAULT '[]',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS scans (
                scan_id TEXT PRIMARY KEY,
                target_ip TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                duration_seconds REAL NOT NULL,
                ports_scanned INTEGER NOT NULL DEFAULT 0,
                ports_found INTEGER NOT NULL DEFAULT 0,
                authentication_tested INTEGER NOT NULL DEFAULT 0,
                successful_auths INTEGER NOT NULL DEFAULT 0,
                protocols_detected TEXT NOT NULL DEFAULT '[]',
                results TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS snapshots (
                snapshot_id TEXT PRIMARY KEY,
                camera_id TEXT NOT NULL REFERENCES cameras(camera_id),
                file_path TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                file_size_bytes INTEGER NOT NULL,
                resolution TEXT NOT NULL,
                format TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS configurations (
                config_key TEXT PRIMARY KEY,
                config_value TEXT NOT NULL,
                config_type TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?;

        for (name, ddl) in [
            ("idx_cameras_ip", "CREATE INDEX IF NOT EXISTS idx_cameras_ip ON cameras(ip)"),
            ("idx_cameras_brand", "CREATE INDEX IF NOT EXISTS idx_cameras_brand ON cameras(brand)"),
            ("idx_scans_target_ip", "CREATE INDEX IF NOT EXISTS idx_scans_target_ip ON scans(target_ip)"),
            ("idx_scans_timestamp", "CREATE INDEX IF NOT EXISTS idx_scans_timestamp ON scans(timestamp)"),
            ("idx_snapshots_camera_id", "CREATE INDEX IF NOT EXISTS idx_snapshots_camera_id ON snapshots(camera_id)"),
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| CoreError::Storage(format!("{name}: {e}")))?;
        }

        Ok(())
    }

    pub async fn upsert_camera(&self, record: &CameraRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO cameras (camera_id, brand, model, ip, last_seen, connection_count,
                successful_connections, failed_connections, total_uptime_minutes, snapshots_count,
                protocols, metadata, created_at, updated_at)
             VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?)
             ON CONFLICT(camera_id) DO UPDATE SET
                brand = excluded.brand,
                model = excluded.model,
                ip = excluded.ip,
                last_seen = excluded.last_seen,
                connection_count = excluded.connection_count,
                successful_connections = excluded.successful_connections,
                failed_connections = excluded.failed_connections,
                total_uptime_minutes = excluded.total_uptime_minutes,
                snapshots_count = excluded.snapshots_count,
                protocols = excluded.protocols,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at",
        )
        .bind(&record.camera_id)
        .bind(&record.brand)
        .bind(&record.model)
        .bind(&record.ip)
        .bind(record.last_seen)
        .bind(record.connection_count)
        .bind(record.successful_connections)
        .bind(record.failed_connections)
        .bind(record.total_uptime_minutes)
        .bind(record.snapshots_count)
        .bind(record.protocols.to_string())
        .bind(record.metadata.to_string())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(())
    }

    pub async fn get_camera(&self, camera_id: &str) -> Result<Option<CameraRecord>> {
        let row = sqlx::query(
            "SELECT camera_id, brand, model, ip, last_seen, connection_count,
                successful_connections, failed_connections, total_uptime_minutes, snapshots_count,
                protocols, metadata, created_at, updated_at FROM cameras WHERE camera_id = ?",
        )
        .bind(camera_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?;

        row.map(camera_from_row).transpose()
    }

    pub async fn insert_scan(&self, record: &ScanRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO scans (scan_id, target_ip, timestamp, duration_seconds, ports_scanned,
                ports_found, authentication_tested, successful_auths, protocols_detected, results, created_at)
             VALUES (?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(&record.scan_id)
        .bind(&record.target_ip)
        .bind(record.timestamp)
        .bind(record.duration_seconds)
        .bind(record.ports_scanned)
        .bind(record.ports_found)
        .bind(record.authentication_tested)
        .bind(record.successful_auths)
        .bind(record.protocols_detected.to_string())
        .bind(record.results.to_string())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(())
    }

    pub async fn insert_snapshot(&self, record: &SnapshotRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO snapshots (snapshot_id, camera_id, file_path, timestamp, file_size_bytes,
                resolution, format, metadata, created_at)
             VALUES (?,?,?,?,?,?,?,?,?)",
        )
        .bind(&record.snapshot_id)
        .bind(&record.camera_id)
        .bind(&record.file_path)
        .bind(record.timestamp)
        .bind(record.file_size_bytes)
        .bind(&record.resolution)
        .bind(&record.format)
        .bind(record.metadata.to_string())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?;

        sqlx::query("UPDATE cameras SET snapshots_count = snapshots_count + 1, updated_at = ? WHERE camera_id = ?")
            .bind(Utc::now())
            .bind(&record.camera_id)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(())
    }

    pub async fn upsert_configuration(&self, record: &ConfigurationRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO configurations (config_key, config_value, config_type, description, created_at, updated_at)
             VALUES (?,?,?,?,?,?)
             ON CONFLICT(config_key) DO UPDATE SET
                config_value = excluded.config_value,
                config_type = excluded.config_type,
                description = excluded.description,
                updated_at = excluded.updated_at",
        )
        .bind(&record.config_key)
        .bind(&record.config_value)
        .bind(&record.config_type)
        .bind(&record.description)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?;
        Ok(())
    }

    pub async fn get_configuration(&self, key: &str) -> Result<Option<ConfigurationRecord>> {
        let row = sqlx::query(
            "SELECT config_key, config_value, config_type, description, created_at, updated_at
             FROM configurations WHERE config_key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(e.to_string()))?;

        row.map(configuration_from_row).transpose()
    }

    /// Deletes `scans` and `snapshots` rows older than `cutoff`.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<(u64, u64)> {
        let scans = sqlx::query("DELETE FROM scans WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?
            .rows_affected();
        let snapshots = sqlx::query("DELETE FROM snapshots WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))?
            .rows_affected();
        Ok((scans, snapshots))
    }
}

fn camera_from_row(row: sqlx::sqlite::SqliteRow) -> Result<CameraRecord> {
    let protocols: String = row.try_get("protocols").map_err(sqlx_err)?;
    let metadata: String = row.try_get("metadata").map_err(sqlx_err)?;
    Ok(CameraRecord {
        camera_id: row.try_get("camera_id").map_err(sqlx_err)?,
        brand: row.try_get("brand").map_err(sqlx_err)?,
        model: row.try_get("model").map_err(sqlx_err)?,
        ip: row.try_get("ip").map_err(sqlx_err)?,
        last_seen: row.try_get("last_seen").map_err(sqlx_err)?,
        connection_count: row.try_get("connection_count").map_err(sqlx_err)?,
        successful_connections: row.try_get("successful_connections").map_err(sqlx_err)?,
        failed_connections: row.try_get("failed_connections").map_err(sqlx_err)?,
        total_uptime_minutes: row.try_get("total_uptime_minutes").map_err(sqlx_err)?,
        snapshots_count: row.try_get("snapshots_count").map_err(sqlx_err)?,
        protocols: serde_json::from_str(&protocols).unwrap_or(Json::Array(vec![])),
        metadata: serde_json::from_str(&metadata).unwrap_or(Json::Object(Default::default())),
        created_at: row.try_get("created_at").map_err(sqlx_err)?,
        updated_at: row.try_get("updated_at").map_err(sqlx_err)?,
    })
}

fn configuration_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ConfigurationRecord> {
    Ok(ConfigurationRecord {
        config_key: row.try_get("config_key").map_err(sqlx_err)?,
        config_value: row.try_get("config_value").map_err(sqlx_err)?,
        config_type: row.try_get("config_type").map_err(sqlx_err)?,
        description: row.try_get("description").map_err(sqlx_err)?,
        created_at: row.try_get("created_at").map_err(sqlx_err)?,
        updated_at: row.try_get("updated_at").map_err(sqlx_err)?,
    })
}

fn sqlx_err(e: sqlx::Error) -> CoreError {
    CoreError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_camera_record() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(&dir.path().join("camera_data.db")).await.unwrap();

        let now = Utc::now();
        let record = CameraRecord {
            camera_id: "cam-1".into(),
            brand: "dahua".into(),
            model: "ipc-hdw".into(),
            ip: "192.168.1.10".into(),
            last_seen: now,
            connection_count: 3,
            successful_connections: 2,
            failed_connections: 1,
            total_uptime_minutes: 42,
            snapshots_count: 0,
            protocols: serde_json::json!(["rtsp", "onvif"]),
            metadata: serde_json::json!({"location": "lobby"}),
            created_at: now,
            updated_at: now,
        };
        db.upsert_camera(&record).await.unwrap();

        let fetched = db.get_camera("cam-1").await.unwrap().expect("camera present");
        assert_eq!(fetched.brand, "dahua");
        assert_eq!(fetched.connection_count, 3);
        assert_eq!(fetched.protocols, serde_json::json!(["rtsp", "onvif"]));
    }

    #[tokio::test]
    async fn retention_sweep_deletes_only_old_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(&dir.path().join("camera_data.db")).await.unwrap();

        let old = ScanRecord {
            scan_id: "scan-old".into(),
            target_ip: "10.0.0.1".into(),
            timestamp: Utc::now() - chrono::Duration::days(60),
            duration_seconds: 1.0,
            ports_scanned: 3,
            ports_found: 1,
            authentication_tested: false,
            successful_auths: 0,
            protocols_detected: serde_json::json!([]),
            results: serde_json::json!([]),
            created_at: Utc::now(),
        };
        let fresh = ScanRecord {
            scan_id: "scan-fresh".into(),
            ..old.clone()
        };
        let fresh = ScanRecord {
            timestamp: Utc::now(),
            ..fresh
        };
        db.insert_scan(&old).await.unwrap();
        db.insert_scan(&fresh).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(30);
        let (scans_deleted, _) = db.delete_older_than(cutoff).await.unwrap();
        assert_eq!(scans_deleted, 1);
    }
}
