// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! End-to-end integration tests wiring the connection orchestrator, scan
//! coordinator and persistence core together behind a single `Core`.
//!
//! Run with: `cargo test`

use std::net::Ipv4Addr;
use std::time::Duration;

use camorch::camera::{Camera, Capabilities, ProtocolType, RetryPolicy};
use camorch::config::Config;
use camorch::connection::ConnectionKind;
use camorch::core::Core;
use camorch::events::MockSink;
use camorch::scan::{ScanMethod, ScanPriority, ScanRange, ScanState};

fn test_config() -> Config {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = Config::default_for_tests(dir.path().to_path_buf());
    config.api.enabled = false;
    std::mem::forget(dir);
    config
}

fn camera_with_unreachable_ip() -> Camera {
    let mut camera = Camera::new("generic", "ip-camera", "198.51.100.23");
    camera.display_name = "integration-test-camera".into();
    camera.connection.timeout = Duration::from_millis(50);
    camera.connection.retry_policy = RetryPolicy { max_retries: 1, retry_delay: Duration::from_millis(1) };
    camera.capabilities = Capabilities { protocols: vec![ProtocolType::Rtsp], ptz: false, audio: false, codecs: vec!["H264".into()] };
    camera
}

#[tokio::test]
async fn core_start_announces_readiness_and_stop_drains_cleanly() {
    let core = Core::new(test_config()).await.expect("core init");
    let sink = MockSink::new();
    sink.attach(&core.event_bus);

    core.start().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(sink.filter_by_topic("presenter-ready").len(), 1);

    core.stop().await;
    assert!(core.orchestrator.active_cameras().is_empty());
}

#[tokio::test]
async fn connect_then_disconnect_camera_round_trips_through_orchestrator() {
    let core = Core::new(test_config()).await.expect("core init");
    core.start().await;

    let camera = camera_with_unreachable_ip();
    let camera_id = camera.camera_id;
    core.upsert_camera(camera.clone());

    // An unreachable host is expected to fail to connect, not panic or hang.
    let result = core.orchestrator.connect_camera(camera, ConnectionKind::Stream).await;
    assert!(result.is_err());

    core.orchestrator.disconnect_camera(camera_id).await;
    assert!(core.orchestrator.connection_stats(camera_id, ConnectionKind::Stream).is_none());

    core.stop().await;
}

#[tokio::test]
async fn start_stream_on_unreachable_camera_leaves_no_orphaned_pipeline() {
    let core = Core::new(test_config()).await.expect("core init");
    core.start().await;

    let camera = camera_with_unreachable_ip();
    let camera_id = camera.camera_id;

    let result = core.orchestrator.start_stream(camera, 8).await;
    assert!(result.is_err());
    assert!(core.orchestrator.stream(camera_id).is_none());
    assert!(core.orchestrator.active_streams().is_empty());

    core.stop().await;
}

#[tokio::test]
async fn scan_coordinator_runs_a_loopback_range_and_records_history() {
    let core = Core::new(test_config()).await.expect("core init");
    core.scans.start().await;

    let range = ScanRange::new(
        Ipv4Addr::new(127, 0, 0, 1),
        Ipv4Addr::new(127, 0, 0, 1),
        vec![1],
    );
    let scan_id = core.scans.start_scan(range, vec![ScanMethod::PingSweep], ScanPriority::Urgent, false);

    let mut snapshot = None;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let Some(s) = core.scans.scan_status(scan_id) else { break };
        if matches!(s.state, ScanState::Completed | ScanState::Cancelled | ScanState::Failed) {
            snapshot = Some(s);
            break;
        }
    }

    let snapshot = snapshot.expect("scan should finish within the polling window");
    assert_eq!(snapshot.state, ScanState::Completed);
    assert_eq!(core.scans.history(10).len(), 1);

    core.scans.stop().await;
}

#[tokio::test]
async fn camera_by_entry_id_resolves_statically_configured_cameras() {
    let mut config = test_config();
    config.cameras.push(camorch::config::CameraEntry {
        id: "front-door".into(),
        name: "Front Door".into(),
        vendor: "hikvision".into(),
        model: "DS-2CD".into(),
        ip: "203.0.113.5".into(),
        username: "admin".into(),
        password: "secret".into(),
        rtsp_port: 554,
        onvif_port: 80,
        http_port: 80,
        max_reconnect_attempts: 3,
    });

    let core = Core::new(config).await.expect("core init");
    assert!(core.camera_by_entry_id("front-door").is_some());
    assert!(core.camera_by_entry_id("unknown").is_none());
}
