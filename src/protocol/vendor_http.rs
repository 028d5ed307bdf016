// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Vendor-HTTP/CGI handler (§4.A): Amcrest/Dahua family. Authenticates via
//! HTTP-Digest, probes `/cgi-bin/magicBox.cgi` for device identity, serves
//! snapshots via `/cgi-bin/snapshot.cgi`, MJPEG via `/cgi-bin/mjpg/video.cgi`,
//! and PTZ via `/cgi-bin/ptz.cgi` with the fixed action table from
//! `amcrest_handler.py::PTZ_COMMANDS` — paths reproduced verbatim, §6 marks
//! this surface normative.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use reqwest::{Client, Method, StatusCode};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt as _;
use tracing::{info, warn};
use uuid::Uuid;

use crate::camera::{Capabilities, ConnectionConfig, ProtocolType};
use crate::error::{CoreError, Result};
use crate::protocol::digest::{authorization_header, DigestChallenge};
use crate::protocol::{FrameSink, PtzControl, PtzDirection, ProtocolHandler};

/// One GET with transparent HTTP-Digest retry: send once, and if challenged
/// with `401 WWW-Authenticate: Digest ...`, resend with the computed
/// `Authorization` header. §4.A requires this for the whole CGI surface.
async fn digest_get(client: &Client, url: &str, username: &str, password: &str) -> Result<reqwest::Response> {
    let probe = client.get(url).send().await?;
    if probe.status() != StatusCode::UNAUTHORIZED {
        return Ok(probe);
    }
    let challenge = probe
        .headers()
        .get("www-authenticate")
        .and_then(|v| v.to_str().ok())
        .and_then(DigestChallenge::parse)
        .ok_or_else(|| CoreError::Auth(format!("{url}: no digest challenge offered")))?;

    let path_and_query = reqwest::Url::parse(url)
        .map(|u| {
            let mut s = u.path().to_string();
            if let Some(q) = u.query() {
                s.push('?');
                s.push_str(q);
            }
            s
        })
        .unwrap_or_else(|_| url.to_string());

    let auth = authorization_header(username, password, Method::GET.as_str(), &path_and_query, &challenge, 1);
    let resp = client.get(url).header("authorization", auth).send().await?;
    if resp.status() == StatusCode::UNAUTHORIZED {
        return Err(CoreError::Auth(format!("{url}: digest authentication rejected")));
    }
    Ok(resp)
}

/// Fixed PTZ action table (§4.A): `{up,down,left,right,zoom_in,zoom_out,stop}`.
/// Templates reproduced from `amcrest_handler.py::PTZ_COMMANDS`.
fn ptz_path(direction: PtzDirection, channel: u8, speed: u8) -> String {
    let code = match direction {
        PtzDirection::Up => "Up",
        PtzDirection::Down => "Down",
        PtzDirection::Left => "Left",
        PtzDirection::Right => "Right",
        PtzDirection::ZoomIn => "ZoomTele",
        PtzDirection::ZoomOut => "ZoomWide",
    };
    format!("/cgi-bin/ptz.cgi?action=start&code={code}&channel={channel}&arg1=0&arg2={speed}&arg3=0")
}

fn ptz_stop_path(direction: PtzDirection, channel: u8, speed: u8) -> String {
    // amcrest_handler.py always stops with code=Up regardless of the moving
    // direction; the camera's stop command ignores the code field.
    let _ = direction;
    format!("/cgi-bin/ptz.cgi?action=stop&code=Up&channel={channel}&arg1=0&arg2={speed}&arg3=0")
}

fn set_preset_path(channel: u8, preset_id: u8) -> String {
    format!("/cgi-bin/ptz.cgi?action=start&code=SetPreset&channel={channel}&arg1={preset_id}&arg2=0&arg3=0")
}

fn goto_preset_path(channel: u8, preset_id: u8) -> String {
    format!("/cgi-bin/ptz.cgi?action=start&code=GotoPreset&channel={channel}&arg1={preset_id}&arg2=0&arg3=0")
}

fn mjpeg_path(channel: u8, subtype: u8) -> String {
    format!("/cgi-bin/mjpg/video.cgi?channel={channel}&subtype={subtype}")
}

#[derive(Debug, Clone, Default)]
pub struct DeviceIdentity {
    pub machine_name: Option<String>,
    pub device_type: Option<String>,
    pub software_version: Option<String>,
}

/// Amcrest/Dahua CGI handler for one camera.
pub struct VendorHttpHandler {
    camera_id: Uuid,
    connection: ConnectionConfig,
    channel: u8,
    http: Client,
    base_url: String,
    identity: Mutex<Option<DeviceIdentity>>,
    connected: AtomicBool,
    sink: Option<FrameSink>,
    streaming: Arc<AtomicBool>,
    reader_task: Option<JoinHandle<()>>,
    consecutive_failures: Arc<AtomicU32>,
}

impl VendorHttpHandler {
    pub fn new(camera_id: Uuid, connection: ConnectionConfig, channel: u8) -> Self {
        let http = Client::builder().timeout(connection.timeout).build().expect("reqwest client build");
        let base_url = format!("http://{}:{}", connection.ip, connection.http_port);
        Self {
            camera_id,
            connection,
            channel,
            http,
            base_url,
            identity: Mutex::new(None),
            connected: AtomicBool::new(false),
            sink: None,
            streaming: Arc::new(AtomicBool::new(false)),
            reader_task: None,
            consecutive_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    async fn magicbox_field(&self, action: &str) -> Option<String> {
        let url = format!("{}/cgi-bin/magicBox.cgi?action={action}", self.base_url);
        let resp = digest_get(&self.http, &url, &self.connection.username, &self.connection.password)
            .await
            .ok()?;
        let text = resp.text().await.ok()?;
        // magicBox.cgi responses are `key=value` plaintext, e.g. "name=Front Door".
        text.split_once('=').map(|(_, v)| v.trim().to_string())
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.identity.lock().clone()
    }

    pub fn snapshot_url(&self) -> String {
        format!("{}/cgi-bin/snapshot.cgi?channel={}", self.base_url, self.channel)
    }

    pub fn mjpeg_url(&self, subtype: u8) -> String {
        format!("{}{}", self.base_url, mjpeg_path(self.channel, subtype))
    }
}

#[async_trait]
impl ProtocolHandler for VendorHttpHandler {
    async fn connect(&mut self) -> Result<()> {
        if self.connection.username.is_empty() {
            return Err(CoreError::Auth("vendor-http handler requires a username".into()));
        }

        let identity = DeviceIdentity {
            machine_name: self.magicbox_field("getMachineName").await,
            device_type: self.magicbox_field("getDeviceType").await,
            software_version: self.magicbox_field("getSoftwareVersion").await,
        };
        if identity.machine_name.is_none() && identity.device_type.is_none() {
            return Err(CoreError::Unreachable(format!("{}: no magicBox response", self.base_url)));
        }
        info!(camera_id = %self.camera_id, name = ?identity.machine_name, "vendor-http device identified");
        *self.identity.lock() = Some(identity);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.stop_streaming().await.ok();
        self.connected.store(false, Ordering::SeqCst);
        *self.identity.lock() = None;
    }

    async fn test_connection(&mut self) -> bool {
        self.magicbox_field("getMachineName").await.is_some()
    }

    async fn capture_snapshot(&mut self) -> Result<Option<Bytes>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(CoreError::NotConnected);
        }
        let url = self.snapshot_url();
        let resp = digest_get(&self.http, &url, &self.connection.username, &self.connection.password).await?;
        if !resp.status().is_success() {
            return Err(CoreError::Protocol(format!("snapshot.cgi returned {}", resp.status())));
        }
        Ok(Some(resp.bytes().await?))
    }

    /// MJPEG multipart stream: read the `multipart/x-mixed-replace` body and
    /// split out complete JPEG frames on SOI/EOI markers (`FFD8`..`FFD9`).
    async fn start_streaming(&mut self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(CoreError::NotConnected);
        }
        let sink = self.sink.clone().ok_or(CoreError::NotConnected)?;
        let url = self.mjpeg_url(0);
        let client = self.http.clone();
        let username = self.connection.username.clone();
        let password = self.connection.password.clone();
        let camera_id = self.camera_id;

        self.streaming.store(true, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let streaming = self.streaming.clone();
        let failures = self.consecutive_failures.clone();

        self.reader_task = Some(tokio::spawn(async move {
            let resp = match digest_get(&client, &url, &username, &password).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(camera_id = %camera_id, error = %e, "mjpeg stream open failed");
                    return;
                }
            };
            let mut stream = resp.bytes_stream();
            let mut buf = BytesMut::new();
            while streaming.load(Ordering::SeqCst) {
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        failures.store(0, Ordering::SeqCst);
                        buf.extend_from_slice(&chunk);
                        while let Some((frame, rest_start)) = find_jpeg_frame(&buf) {
                            sink(frame);
                            let remaining = buf.split_off(rest_start);
                            buf = remaining;
                        }
                        if buf.len() > 8 * 1024 * 1024 {
                            buf.clear(); // runaway buffer with no valid JPEG markers
                        }
                    }
                    Some(Err(e)) => {
                        warn!(camera_id = %camera_id, error = %e, "mjpeg stream read error");
                        let n = failures.fetch_add(1, Ordering::SeqCst) + 1;
                        if n >= 5 {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }));
        Ok(())
    }

    async fn stop_streaming(&mut self) -> Result<()> {
        self.streaming.store(false, Ordering::SeqCst);
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            protocols: vec![ProtocolType::Http, ProtocolType::Vendor],
            ptz: true,
            audio: false,
            codecs: vec!["MJPEG".into(), "H264".into()],
        }
    }

    fn set_frame_sink(&mut self, sink: FrameSink) {
        self.sink = Some(sink);
    }

    fn as_ptz_control(&mut self) -> Option<&mut dyn PtzControl> {
        Some(self)
    }
}

/// Scans `buf` for one complete `FFD8 .. FFD9` JPEG frame. Returns the frame
/// bytes and the index into `buf` where the remainder begins.
fn find_jpeg_frame(buf: &[u8]) -> Option<(Bytes, usize)> {
    let start = buf.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end_rel = buf[start..].windows(2).position(|w| w == [0xFF, 0xD9])?;
    let end = start + end_rel + 2;
    Some((Bytes::copy_from_slice(&buf[start..end]), end))
}

#[async_trait]
impl PtzControl for VendorHttpHandler {
    async fn ptz_move(&mut self, direction: PtzDirection, speed: u8) -> Result<bool> {
        if !(1..=8).contains(&speed) {
            return Err(CoreError::Validation("ptz speed must be in 1..=8".into()));
        }
        let url = format!("{}{}", self.base_url, ptz_path(direction, self.channel, speed));
        let resp = digest_get(&self.http, &url, &self.connection.username, &self.connection.password).await?;
        Ok(resp.status().is_success())
    }

    async fn ptz_stop(&mut self, direction: PtzDirection) -> Result<bool> {
        let url = format!("{}{}", self.base_url, ptz_stop_path(direction, self.channel, 0));
        let resp = digest_get(&self.http, &url, &self.connection.username, &self.connection.password).await?;
        Ok(resp.status().is_success())
    }

    async fn set_preset(&mut self, preset_id: u8) -> Result<bool> {
        if !(1..=255).contains(&preset_id) {
            return Err(CoreError::Validation("preset id must be in 1..=255".into()));
        }
        let url = format!("{}{}", self.base_url, set_preset_path(self.channel, preset_id));
        let resp = digest_get(&self.http, &url, &self.connection.username, &self.connection.password).await?;
        Ok(resp.status().is_success())
    }

    async fn goto_preset(&mut self, preset_id: u8) -> Result<bool> {
        if !(1..=255).contains(&preset_id) {
            return Err(CoreError::Validation("preset id must be in 1..=255".into()));
        }
        let url = format!("{}{}", self.base_url, goto_preset_path(self.channel, preset_id));
        let resp = digest_get(&self.http, &url, &self.connection.username, &self.connection.password).await?;
        Ok(resp.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ptz_left_path_matches_normative_s6_template() {
        let path = ptz_path(PtzDirection::Left, 0, 4);
        assert_eq!(path, "/cgi-bin/ptz.cgi?action=start&code=Left&channel=0&arg1=0&arg2=4&arg3=0");
    }

    #[test]
    fn preset_paths_use_set_and_goto_actions() {
        assert_eq!(set_preset_path(0, 3), "/cgi-bin/ptz.cgi?action=start&code=SetPreset&channel=0&arg1=3&arg2=0&arg3=0");
        assert_eq!(goto_preset_path(0, 3), "/cgi-bin/ptz.cgi?action=start&code=GotoPreset&channel=0&arg1=3&arg2=0&arg3=0");
    }

    #[test]
    fn mjpeg_url_builder_uses_cgi_bin_path() {
        assert_eq!(mjpeg_path(1, 0), "/cgi-bin/mjpg/video.cgi?channel=1&subtype=0");
    }

    #[test]
    fn find_jpeg_frame_extracts_first_complete_frame_and_leaves_remainder() {
        let mut data = vec![0u8; 2];
        data[0] = 0xFF;
        data[1] = 0xD8;
        data.extend_from_slice(b"payload");
        data.push(0xFF);
        data.push(0xD9);
        data.extend_from_slice(b"trailing");

        let (frame, rest_start) = find_jpeg_frame(&data).unwrap();
        assert_eq!(&frame[..2], &[0xFF, 0xD8]);
        assert_eq!(&frame[frame.len() - 2..], &[0xFF, 0xD9]);
        assert_eq!(&data[rest_start..], b"trailing");
    }

    #[test]
    fn find_jpeg_frame_returns_none_without_end_marker() {
        let data = vec![0xFF, 0xD8, 1, 2, 3];
        assert!(find_jpeg_frame(&data).is_none());
    }
}
