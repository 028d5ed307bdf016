// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Executes a single [`ScanJob`]: ping sweep, port scan, protocol
//! classification and ONVIF probing over a [`ScanRange`].

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::camera::ProtocolType;
use crate::events::{Event, EventBus};

use super::{HostResult, ScanMethod, ScanPriority, ScanRange, ScanState};

/// Ports a protocol-agnostic ping sweep tries to connect to, in order.
/// The corpus carries no ICMP crate and raw sockets need elevated
/// privileges, so reachability is approximated with a TCP connect.
const PING_PROBE_PORTS: [u16; 3] = [80, 554, 443];
const PROBE_TIMEOUT: Duration = Duration::from_millis(800);
const MAX_INFLIGHT_PROBES: usize = 64;

/// One unit of scan work: a range, the methods to run against it, and its
/// own cancellation flag and progress counters.
#[derive(Debug)]
pub struct ScanJob {
    pub job_id: Uuid,
    pub range: ScanRange,
    pub methods: Vec<ScanMethod>,
    pub priority: ScanPriority,
    pub created_at: DateTime<Utc>,
    state: Mutex<ScanState>,
    progress_done: AtomicUsize,
    progress_total: AtomicUsize,
    results: Mutex<Vec<HostResult>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    completed_at: Mutex<Option<DateTime<Utc>>>,
    error: Mutex<Option<String>>,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScanJobSnapshot {
    pub job_id: Uuid,
    pub state: ScanState,
    pub current: usize,
    pub total: usize,
    pub cameras_found: usize,
    pub results: Vec<HostResult>,
    pub error: Option<String>,
}

impl ScanJob {
    pub fn new(range: ScanRange, methods: Vec<ScanMethod>, priority: ScanPriority) -> Self {
        let total = range.host_count();
        Self {
            job_id: Uuid::new_v4(),
            range,
            methods,
            priority,
            created_at: Utc::now(),
            state: Mutex::new(ScanState::Queued),
            progress_done: AtomicUsize::new(0),
            progress_total: AtomicUsize::new(total),
            results: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
            completed_at: Mutex::new(None),
            error: Mutex::new(None),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> ScanState {
        *self.state.lock()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ScanJobSnapshot {
        let results = self.results.lock().clone();
        let cameras_found = results.iter().filter(|r| r.is_camera_candidate).count();
        ScanJobSnapshot {
            job_id: self.job_id,
            state: self.state(),
            current: self.progress_done.load(Ordering::SeqCst),
            total: self.progress_total.load(Ordering::SeqCst),
            cameras_found,
            results,
            error: self.error.lock().clone(),
        }
    }

    pub fn results(&self) -> Vec<HostResult> {
        self.results.lock().clone()
    }
}

/// Stateless executor: runs jobs handed to it, reporting progress and
/// completion through the shared event bus.
#[derive(Clone)]
pub struct ScanEngine {
    event_bus: EventBus,
    semaphore: Arc<Semaphore>,
}

impl ScanEngine {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            semaphore: Arc::new(Semaphore::new(MAX_INFLIGHT_PROBES)),
        }
    }

    /// Runs `job` to completion (or cancellation), mutating its internal
    /// state and emitting `scan-progress` / `scan-completed` events.
    pub async fn run(&self, job: Arc<ScanJob>) {
        *job.state.lock() = ScanState::Running;
        *job.started_at.lock() = Some(Utc::now());

        let hosts = job.range.hosts();
        let total = hosts.len();
        job.progress_total.store(total, Ordering::SeqCst);

        let do_ping = job.methods.contains(&ScanMethod::PingSweep);
        let do_ports = job.methods.contains(&ScanMethod::PortScan);
        let do_protocol = job.methods.contains(&ScanMethod::ProtocolDetect);
        let do_onvif = job.methods.contains(&ScanMethod::OnvifDiscovery);

        let mut handles = Vec::with_capacity(total);
        for ip in hosts {
            if job.is_cancelled() {
                break;
            }
            let permit = self.semaphore.clone().acquire_owned().await.unwrap();
            let ports = job.range.ports.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                probe_host(ip, ports, do_ping, do_ports, do_protocol, do_onvif).await
            }));
        }

        let mut done: usize = 0;
        for handle in handles {
            if job.is_cancelled() {
                handle.abort();
                continue;
            }
            if let Ok(result) = handle.await {
                job.results.lock().push(result);
            }
            done += 1;
            job.progress_done.store(done, Ordering::SeqCst);
            if done % 4 == 0 || done == total {
                self.event_bus.publish(Event::ScanProgress {
                    scan_id: job.job_id,
                    current: done,
                    total,
                    message: format!("{done}/{total} hosts probed"),
                });
            }
        }

        if job.is_cancelled() {
            *job.state.lock() = ScanState::Cancelled;
        } else {
            *job.state.lock() = ScanState::Completed;
        }
        *job.completed_at.lock() = Some(Utc::now());

        let cameras_found = job
            .results
            .lock()
            .iter()
            .filter(|r| r.is_camera_candidate)
            .count();
        self.event_bus.publish(Event::ScanCompleted {
            scan_id: job.job_id,
            cameras_found,
        });
    }
}

async fn probe_host(
    ip: Ipv4Addr,
    ports: Vec<u16>,
    do_ping: bool,
    do_ports: bool,
    do_protocol: bool,
    do_onvif: bool,
) -> HostResult {
    let mut result = HostResult {
        ip,
        ..Default::default()
    };

    if do_ping {
        result.reachable = ping_sweep(ip).await;
        if !result.reachable {
            return result;
        }
    } else {
        result.reachable = true;
    }

    let scan_ports: Vec<u16> = if ports.is_empty() {
        vec![80, 554, 8080]
    } else {
        ports
    };

    if do_ports {
        for port in &scan_ports {
            if tcp_connect(ip, *port).await {
                result.open_ports.push(*port);
            }
        }
        result.open_ports.sort_unstable();
    } else if do_protocol || do_onvif {
        // protocol/onvif stages still need candidate ports to probe.
        for port in &scan_ports {
            if tcp_connect(ip, *port).await {
                result.open_ports.push(*port);
            }
        }
        result.open_ports.sort_unstable();
    }

    if do_protocol {
        result.protocol = classify_protocol(ip, &result.open_ports).await;
    }

    if do_onvif && result.open_ports.iter().any(|p| *p == 80 || *p == 2020) {
        result.onvif_candidate = probe_onvif(ip, &result.open_ports).await;
        if result.onvif_candidate {
            result.protocol = Some(ProtocolType::Onvif);
        }
    }

    result.is_camera_candidate =
        result.protocol.is_some() || result.onvif_candidate || !result.open_ports.is_empty();
    result
}

async fn ping_sweep(ip: Ipv4Addr) -> bool {
    for port in PING_PROBE_PORTS {
        if tcp_connect(ip, port).await {
            return true;
        }
    }
    false
}

async fn tcp_connect(ip: Ipv4Addr, port: u16) -> bool {
    let addr = SocketAddr::from((ip, port));
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Lightweight fingerprint: send a protocol-appropriate probe and inspect
/// the first bytes of the reply rather than completing a full handshake.
async fn classify_protocol(ip: Ipv4Addr, open_ports: &[u16]) -> Option<ProtocolType> {
    if open_ports.contains(&554) && rtsp_options_probe(ip, 554).await {
        return Some(ProtocolType::Rtsp);
    }
    if open_ports.iter().any(|p| *p == 80 || *p == 8080) {
        return Some(ProtocolType::Http);
    }
    None
}

async fn rtsp_options_probe(ip: Ipv4Addr, port: u16) -> bool {
    let addr = SocketAddr::from((ip, port));
    let attempt = tokio::time::timeout(PROBE_TIMEOUT, async move {
        let mut stream = TcpStream::connect(addr).await?;
        let request = format!(
            "OPTIONS rtsp://{ip}:{port}/ RTSP/1.0\r\nCSeq: 1\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await?;
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await?;
        std::io::Result::Ok(n > 0 && buf[..n].starts_with(b"RTSP/1.0"))
    })
    .await;
    matches!(attempt, Ok(Ok(true)))
}

/// Unicast stand-in for WS-Discovery multicast probing: ask the ONVIF
/// device service for anything at all within the probe timeout.
async fn probe_onvif(ip: Ipv4Addr, open_ports: &[u16]) -> bool {
    let port = if open_ports.contains(&2020) { 2020 } else { 80 };
    let url = format!("http://{ip}:{port}/onvif/device_service");
    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(c) => c,
        Err(_) => return false,
    };
    matches!(client.get(&url).send().await, Ok(resp) if resp.status().as_u16() < 500)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    #[test]
    fn priority_ordering_puts_urgent_first() {
        let mut priorities = vec![
            ScanPriority::Low,
            ScanPriority::Urgent,
            ScanPriority::Normal,
            ScanPriority::High,
        ];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![
                ScanPriority::Urgent,
                ScanPriority::High,
                ScanPriority::Normal,
                ScanPriority::Low,
            ]
        );
    }

    #[test]
    fn job_snapshot_reports_queued_before_run() {
        let range = ScanRange::new(
            "127.0.0.1".parse().unwrap(),
            "127.0.0.1".parse().unwrap(),
            vec![1],
        );
        let job = ScanJob::new(range, vec![ScanMethod::PingSweep], ScanPriority::Normal);
        let snapshot = job.snapshot();
        assert_eq!(snapshot.state, ScanState::Queued);
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.cameras_found, 0);
    }

    #[tokio::test]
    async fn cancelled_job_settles_in_cancelled_state() {
        let range = ScanRange::new(
            "10.0.0.1".parse().unwrap(),
            "10.0.0.4".parse().unwrap(),
            vec![9],
        );
        let job = Arc::new(ScanJob::new(
            range,
            vec![ScanMethod::PingSweep],
            ScanPriority::Low,
        ));
        job.cancel();
        let engine = ScanEngine::new(EventBus::new(Duration::from_millis(0)));
        engine.run(job.clone()).await;
        assert_eq!(job.state(), ScanState::Cancelled);
    }

    #[tokio::test]
    async fn unreachable_host_yields_no_camera_candidate() {
        // port 9 (discard) on loopback is extremely unlikely to accept
        // connections in a test sandbox, exercising the unreachable path.
        let reachable = tcp_connect("127.0.0.1".parse().unwrap(), 9).await;
        if reachable {
            return;
        }
        let result = probe_host("127.0.0.1".parse().unwrap(), vec![9], true, true, true, false).await;
        assert!(!result.reachable);
        assert!(!result.is_camera_candidate);
    }
}
