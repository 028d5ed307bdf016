// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Configuration: TOML file layer (§6 "Config keys") plus the tagged
//! [`ConfigValue`] used by the Persistence Core's `configurations` table (§9
//! "Runtime-typed config values").
//!
//! Loading follows the teacher's `Config::from_file` + `validate()` shape;
//! the config surface itself is generalized to cover every key §6 names.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Directory holding `data/`, `config/`, and `backups/` (§6 on-disk layout).
    pub data_root: PathBuf,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub api: ApiConfig,
    /// Cameras known at startup; the scan coordinator may discover more at runtime.
    #[serde(default)]
    pub cameras: Vec<CameraEntry>,
}

/// `network.*` (§6).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NetworkConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry_attempts: u32,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retry_attempts: 0,
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_timeout_secs() -> u64 { 5 }
fn default_buffer_size() -> usize { 5 }

/// `recording.*` (§6).
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RecordingConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// `security.*` (§6).
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub encrypt_config: bool,
}

/// `performance.*` (§6).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PerformanceConfig {
    #[serde(default = "default_max_concurrent_connections")]
    pub max_concurrent_connections: usize,
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,
    #[serde(default = "default_max_connections_per_camera")]
    pub max_connections_per_camera: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_connections: default_max_concurrent_connections(),
            thread_pool_size: default_thread_pool_size(),
            max_connections_per_camera: default_max_connections_per_camera(),
        }
    }
}

fn default_max_concurrent_connections() -> usize { 50 }
fn default_thread_pool_size() -> usize { 8 }
fn default_max_connections_per_camera() -> usize { 4 }

/// Persistence Core cadences (§4.G).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PersistenceConfig {
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: u64,
    #[serde(default = "default_backup_interval_hours")]
    pub backup_interval_hours: u64,
    #[serde(default = "default_auto_cleanup_days")]
    pub auto_cleanup_days: u64,
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            cache_ttl_hours: default_cache_ttl_hours(),
            backup_interval_hours: default_backup_interval_hours(),
            auto_cleanup_days: default_auto_cleanup_days(),
            max_backups: default_max_backups(),
        }
    }
}

fn default_cache_ttl_hours() -> u64 { 24 }
fn default_backup_interval_hours() -> u64 { 24 }
fn default_auto_cleanup_days() -> u64 { 30 }
fn default_max_backups() -> usize { 10 }

/// Scan Coordinator cadences (§4.F).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_max_concurrent_scans")]
    pub max_concurrent_scans: usize,
    #[serde(default = "default_cache_expiry_hours")]
    pub cache_expiry_hours: u64,
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,
    #[serde(default = "default_scan_history_retention_days")]
    pub scan_history_retention_days: u64,
    #[serde(default = "default_max_completed_scans")]
    pub max_completed_scans: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans: default_max_concurrent_scans(),
            cache_expiry_hours: default_cache_expiry_hours(),
            max_cache_entries: default_max_cache_entries(),
            scan_history_retention_days: default_scan_history_retention_days(),
            max_completed_scans: default_max_completed_scans(),
        }
    }
}

fn default_max_concurrent_scans() -> usize { 3 }
fn default_cache_expiry_hours() -> u64 { 24 }
fn default_max_cache_entries() -> usize { 1000 }
fn default_scan_history_retention_days() -> u64 { 30 }
fn default_max_completed_scans() -> usize { 20 }

/// HTTP API configuration — the thin command/response boundary named in §6.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enabled: default_api_enabled(), port: default_api_port() }
    }
}

fn default_api_enabled() -> bool { true }
fn default_api_port() -> u16 { 8080 }

/// One statically-configured camera (`<vendor>.ip` / `.username` / `.password`
/// keys of §6, grouped per camera rather than flattened by vendor name).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraEntry {
    pub id: String,
    pub name: String,
    pub vendor: String,
    #[serde(default)]
    pub model: String,
    pub ip: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_rtsp_port")]
    pub rtsp_port: u16,
    #[serde(default = "default_onvif_port")]
    pub onvif_port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

fn default_rtsp_port() -> u16 { 554 }
fn default_onvif_port() -> u16 { 80 }
fn default_http_port() -> u16 { 80 }

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read config file: {e}")))?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.network.timeout_secs < 1 {
            return Err(CoreError::Validation("network.timeout must be >= 1".into()));
        }
        if self.network.buffer_size < 1 {
            return Err(CoreError::Validation("network.buffer_size must be >= 1".into()));
        }
        if self.performance.max_concurrent_connections < 1 {
            return Err(CoreError::Validation(
                "performance.max_concurrent_connections must be >= 1".into(),
            ));
        }
        if self.performance.thread_pool_size < 1 {
            return Err(CoreError::Validation("performance.thread_pool_size must be >= 1".into()));
        }
        for cam in &self.cameras {
            if cam.ip.parse::<IpAddr>().is_err() {
                return Err(CoreError::Validation(format!("camera '{}': invalid ip '{}'", cam.id, cam.ip)));
            }
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_root.join("data")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir().join("backups")
    }

    pub fn snapshots_dir(&self, camera_id: &str) -> PathBuf {
        self.data_dir().join("snapshots").join(camera_id)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("camera_data.db")
    }

    /// A minimal config rooted at `data_root`, for tests that need a
    /// `Config` without writing a TOML fixture to disk.
    #[cfg(test)]
    pub fn default_for_tests(data_root: PathBuf) -> Self {
        Self {
            data_root,
            network: NetworkConfig::default(),
            recording: RecordingConfig::default(),
            security: SecurityConfig::default(),
            performance: PerformanceConfig::default(),
            persistence: PersistenceConfig::default(),
            scan: ScanConfig::default(),
            api: ApiConfig::default(),
            cameras: Vec::new(),
        }
    }
}

/// Runtime-typed config value (§9): the dynamic layer backing the
/// `configurations` table's `config_value`/`config_type` columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<ConfigValue>),
    Dict(HashMap<String, ConfigValue>),
    /// Encrypted at rest when `security.encrypt_config` is set; see `persistence::crypto`.
    Password(String),
    FilePath(PathBuf),
    IpAddress(IpAddr),
}

impl ConfigValue {
    /// The `config_type` tag stored alongside `config_value` in the DB.
    pub fn type_tag(&self) -> &'static str {
        match self {
            ConfigValue::String(_) => "string",
            ConfigValue::Int(_) => "int",
            ConfigValue::Float(_) => "float",
            ConfigValue::Bool(_) => "bool",
            ConfigValue::List(_) => "list",
            ConfigValue::Dict(_) => "dict",
            ConfigValue::Password(_) => "password",
            ConfigValue::FilePath(_) => "file_path",
            ConfigValue::IpAddress(_) => "ip_address",
        }
    }

    /// Table-driven validation per tag (§9: "validators are table-driven per tag").
    pub fn validate(&self) -> Result<()> {
        match self {
            ConfigValue::String(s) | ConfigValue::Password(s) => {
                if s.is_empty() {
                    return Err(CoreError::Validation("value must not be empty".into()));
                }
            }
            ConfigValue::FilePath(p) => {
                if p.as_os_str().is_empty() {
                    return Err(CoreError::Validation("file path must not be empty".into()));
                }
            }
            ConfigValue::IpAddress(_) => {} // parsed already, always valid
            ConfigValue::List(items) => {
                for item in items {
                    item.validate()?;
                }
            }
            ConfigValue::Dict(map) => {
                for v in map.values() {
                    v.validate()?;
                }
            }
            ConfigValue::Int(_) | ConfigValue::Float(_) | ConfigValue::Bool(_) => {}
        }
        Ok(())
    }

    pub fn is_sensitive(&self) -> bool {
        matches!(self, ConfigValue::Password(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_value_type_tags() {
        assert_eq!(ConfigValue::Bool(true).type_tag(), "bool");
        assert_eq!(ConfigValue::Password("x".into()).type_tag(), "password");
    }

    #[test]
    fn empty_password_fails_validation() {
        let v = ConfigValue::Password(String::new());
        assert!(v.validate().is_err());
    }

    #[test]
    fn nested_dict_validates_recursively() {
        let mut dict = HashMap::new();
        dict.insert("sub".to_string(), ConfigValue::String(String::new()));
        let v = ConfigValue::Dict(dict);
        assert!(v.validate().is_err());
    }

    #[test]
    fn rejects_bad_camera_ip() {
        let toml_src = r#"
            data_root = "/tmp/camorch-test"
            [[cameras]]
            id = "cam1"
            name = "Front"
            vendor = "generic"
            ip = "not-an-ip"
        "#;
        let cfg: Config = toml::from_str(toml_src).unwrap();
        assert!(cfg.validate().is_err());
    }
}
