// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The [`Camera`] entity and its supporting value types (§3 DATA MODEL).
//!
//! `camera_id` is the only immutable identity; everything else — including
//! `display_name` — may change across the camera's lifetime. Connections and
//! streams never hold a `Camera` by value, only its `camera_id`; see
//! `connection::orchestrator` for the ownership rule. The GStreamer pipeline
//! that used to live in this module moved to `protocol::rtsp`, which builds
//! one pipeline per [`Connection`](crate::connection::model::Connection)
//! rather than per camera record.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol a [`crate::connection::model::Connection`] or
/// [`crate::protocol::ProtocolHandler`] operates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolType {
    Onvif,
    Rtsp,
    Http,
    Vendor,
}

impl std::fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProtocolType::Onvif => "onvif",
            ProtocolType::Rtsp => "rtsp",
            ProtocolType::Http => "http",
            ProtocolType::Vendor => "vendor",
        };
        f.write_str(s)
    }
}

/// Named endpoint kinds the discovery process may fill in. `Other` keeps the
/// set open per `endpoint_kind ∈ {rtsp_main, rtsp_sub, snapshot, onvif_device,
/// mjpeg, …}` — vendors occasionally expose endpoints with no dedicated variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointKind {
    RtspMain,
    RtspSub,
    Snapshot,
    OnvifDevice,
    Mjpeg,
    Other(String),
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointKind::RtspMain => f.write_str("rtsp_main"),
            EndpointKind::RtspSub => f.write_str("rtsp_sub"),
            EndpointKind::Snapshot => f.write_str("snapshot"),
            EndpointKind::OnvifDevice => f.write_str("onvif_device"),
            EndpointKind::Mjpeg => f.write_str("mjpeg"),
            EndpointKind::Other(s) => f.write_str(s),
        }
    }
}

/// One discovered URL for a camera, with freshness/trust metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub verified: bool,
    pub priority: u8,
    pub discovered_at: DateTime<Utc>,
}

/// Authentication scheme a handler should use when talking to the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthScheme {
    None,
    Basic,
    Digest,
}

/// Retry policy applied by the Connection Model (§4.B) on `connect()` failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, retry_delay: Duration::from_secs(2) }
    }
}

/// Per-protocol connection parameters: IP, credentials, ports, timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub ip: String,
    pub username: String,
    pub password: String,
    pub rtsp_port: u16,
    pub onvif_port: u16,
    pub http_port: u16,
    pub timeout: Duration,
    pub retry_policy: RetryPolicy,
    pub auth_scheme: AuthScheme,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ip: String::new(),
            username: String::new(),
            password: String::new(),
            rtsp_port: 554,
            onvif_port: 80,
            http_port: 80,
            timeout: Duration::from_secs(5),
            retry_policy: RetryPolicy::default(),
            auth_scheme: AuthScheme::Digest,
        }
    }
}

/// Stream-shape parameters a handler should request from the camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub channel: u8,
    pub sub_stream_index: u8,
    pub target_width: u32,
    pub target_height: u32,
    pub target_fps: u32,
    pub codec: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel: 1,
            sub_stream_index: 0,
            target_width: 1920,
            target_height: 1080,
            target_fps: 15,
            codec: "H264".into(),
        }
    }
}

/// One named stream profile offered by the camera (resolution/fps/codec).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamProfile {
    pub name: String,
    pub stream_type: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub codec: String,
    pub is_default: bool,
}

/// Static capability descriptor, as returned by `ProtocolHandler::capabilities()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub protocols: Vec<ProtocolType>,
    pub ptz: bool,
    pub audio: bool,
    pub codecs: Vec<String>,
}

/// Hardware/location metadata that does not affect connection behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraMetadata {
    pub location: Option<String>,
    pub hardware_revision: Option<String>,
    pub firmware_version: Option<String>,
    pub serial_number: Option<String>,
}

/// One physical IP camera. `camera_id` is stable across restarts;
/// `display_name` may change. See §3 for the full invariant list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub camera_id: Uuid,
    pub vendor: String,
    pub model: String,
    pub display_name: String,
    pub connection: ConnectionConfig,
    pub stream: StreamConfig,
    pub capabilities: Capabilities,
    pub endpoints: HashMap<EndpointKind, Endpoint>,
    pub profiles: Vec<StreamProfile>,
    pub metadata: CameraMetadata,
    pub is_active: bool,
}

impl Camera {
    pub fn new(vendor: impl Into<String>, model: impl Into<String>, ip: impl Into<String>) -> Self {
        let ip = ip.into();
        Self {
            camera_id: Uuid::new_v4(),
            vendor: vendor.into(),
            model: model.into(),
            display_name: String::new(),
            connection: ConnectionConfig { ip, ..ConnectionConfig::default() },
            stream: StreamConfig::default(),
            capabilities: Capabilities::default(),
            endpoints: HashMap::new(),
            profiles: Vec::new(),
            metadata: CameraMetadata::default(),
            is_active: true,
        }
    }

    pub fn default_profile(&self) -> Option<&StreamProfile> {
        self.profiles.iter().find(|p| p.is_default).or_else(|| self.profiles.first())
    }

    pub fn endpoint(&self, kind: &EndpointKind) -> Option<&Endpoint> {
        self.endpoints.get(kind)
    }

    pub fn set_endpoint(&mut self, kind: EndpointKind, url: String, verified: bool, priority: u8) {
        self.endpoints.insert(
            kind,
            Endpoint { url, verified, priority, discovered_at: Utc::now() },
        );
    }

    /// Builds a `Camera` from a statically-configured `[[cameras]]` entry
    /// (§6 `<vendor>.ip`/`.username`/`.password` keys). The protocol guess
    /// mirrors `protocol::onvif`'s own vendor heuristics: ONVIF-capable
    /// vendors get `Onvif` first so the orchestrator's handler factory
    /// picks it; everything else defaults to RTSP.
    pub fn from_entry(entry: &crate::config::CameraEntry) -> Self {
        let protocols = guess_protocols(&entry.vendor);
        Self {
            camera_id: Uuid::new_v4(),
            vendor: entry.vendor.clone(),
            model: entry.model.clone(),
            display_name: entry.name.clone(),
            connection: ConnectionConfig {
                ip: entry.ip.clone(),
                username: entry.username.clone(),
                password: entry.password.clone(),
                rtsp_port: entry.rtsp_port,
                onvif_port: entry.onvif_port,
                http_port: entry.http_port,
                retry_policy: RetryPolicy {
                    max_retries: entry.max_reconnect_attempts.max(RetryPolicy::default().max_retries),
                    ..RetryPolicy::default()
                },
                ..ConnectionConfig::default()
            },
            stream: StreamConfig::default(),
            capabilities: Capabilities { protocols, ..Capabilities::default() },
            endpoints: HashMap::new(),
            profiles: Vec::new(),
            metadata: CameraMetadata::default(),
            is_active: true,
        }
    }
}

fn guess_protocols(vendor: &str) -> Vec<ProtocolType> {
    let vendor = vendor.to_ascii_lowercase();
    match vendor.as_str() {
        "onvif" => vec![ProtocolType::Onvif, ProtocolType::Rtsp],
        "dahua" | "tplink" | "tp-link" | "steren" | "generic" => vec![ProtocolType::Rtsp],
        "amcrest" | "vendor" | "vendor_http" => vec![ProtocolType::Vendor],
        _ => vec![ProtocolType::Rtsp],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_id_is_stable_identity() {
        let cam = Camera::new("Dahua", "IPC-HDW", "192.168.1.50");
        let id = cam.camera_id;
        let mut renamed = cam;
        renamed.display_name = "Front Door".into();
        assert_eq!(renamed.camera_id, id);
    }

    #[test]
    fn default_profile_falls_back_to_first() {
        let mut cam = Camera::new("Generic", "Cam", "10.0.0.5");
        cam.profiles.push(StreamProfile {
            name: "sub".into(),
            stream_type: "sub".into(),
            width: 640,
            height: 360,
            fps: 10,
            bitrate_kbps: 512,
            codec: "H264".into(),
            is_default: false,
        });
        assert_eq!(cam.default_profile().unwrap().name, "sub");
    }
}
