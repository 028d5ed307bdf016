// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! camorchd — universal IP-camera orchestrator daemon.
//!
//! Usage:
//!   camorchd run      --config config.toml
//!   camorchd status    --config config.toml
//!   camorchd scan      --config config.toml --start-ip 192.168.1.1 --end-ip 192.168.1.254 [--ports 80,554,2020] [--priority normal] [--use-cache]
//!   camorchd snapshot  --config config.toml --camera cam1 -o snapshot.jpg
//!   camorchd ptz       --config config.toml --camera cam1 --direction left [--speed 4]

use std::io::Write;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use camorch::api;
use camorch::config::Config;
use camorch::connection::ConnectionKind;
use camorch::core::Core;
use camorch::protocol::PtzDirection;
use camorch::scan::{ScanMethod, ScanPriority, ScanRange, ScanState};

#[derive(Parser)]
#[command(name = "camorchd", about = "Universal IP-camera orchestrator", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the orchestrator, scan coordinator and persistence core, and
    /// (if enabled) the HTTP API, until interrupted.
    Run {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print a one-shot status snapshot and exit.
    Status {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Run a single network scan and print its results.
    Scan {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        #[arg(long)]
        start_ip: Ipv4Addr,
        #[arg(long)]
        end_ip: Ipv4Addr,
        /// Comma-separated port list, e.g. "80,554,2020".
        #[arg(long, default_value = "80,554,2020,8080")]
        ports: String,
        /// One of: urgent, high, normal, low.
        #[arg(long, default_value = "normal")]
        priority: String,
        #[arg(long, default_value_t = false)]
        use_cache: bool,
    },
    /// Connect to one camera and capture a snapshot.
    Snapshot {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// The camera's config-file id (`[[cameras]] id = "..."`).
        #[arg(long)]
        camera: String,
        #[arg(short, long, default_value = "snapshot.jpg")]
        output: PathBuf,
    },
    /// Send one PTZ command to a connected camera.
    Ptz {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        #[arg(long)]
        camera: String,
        /// One of: up, down, left, right, zoom_in, zoom_out.
        #[arg(long)]
        direction: String,
        #[arg(long, default_value_t = 4)]
        speed: u8,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Status { config } => status(config).await,
        Command::Scan { config, start_ip, end_ip, ports, priority, use_cache } => {
            scan(config, start_ip, end_ip, &ports, &priority, use_cache).await
        }
        Command::Snapshot { config, camera, output } => snapshot(config, &camera, &output).await,
        Command::Ptz { config, camera, direction, speed } => ptz(config, &camera, &direction, speed).await,
    }
}

async fn load_core(config_path: PathBuf) -> Option<std::sync::Arc<Core>> {
    let cfg = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    match Core::new(cfg).await {
        Ok(core) => Some(core),
        Err(e) => {
            error!(error = %e, "failed to initialize core");
            std::process::exit(1);
        }
    }
}

async fn run(config_path: PathBuf) {
    let Some(core) = load_core(config_path).await else { return };

    info!(
        cameras = core.cameras().len(),
        data_root = ?core.config.data_root,
        api_enabled = core.config.api.enabled,
        "starting camorchd"
    );

    core.start().await;

    let api_task = if core.config.api.enabled {
        let state = std::sync::Arc::new(api::AppState { core: core.clone() });
        let port = core.config.api.port;
        Some(tokio::spawn(async move {
            api::start_server(state, port).await;
        }))
    } else {
        None
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down..."),
        Err(e) => error!(error = %e, "signal handler error"),
    }

    if let Some(task) = api_task {
        task.abort();
    }
    core.stop().await;
}

async fn status(config_path: PathBuf) {
    let Some(core) = load_core(config_path).await else { return };

    println!("=== camorchd status ===");
    println!("Data root    : {}", core.config.data_root.display());
    println!("Cameras      : {}", core.cameras().len());
    for cam in core.cameras() {
        println!(
            "  {} ({})  vendor={} ip={}",
            cam.camera_id, cam.display_name, cam.vendor, cam.connection.ip
        );
    }
    let metrics = core.orchestrator.metrics();
    println!("Connections  : {} total, {:.1}% uptime", metrics.total_connections, metrics.uptime_percent);
    println!("Scan history : {} entries", core.scans.history(usize::MAX).len());
}

fn parse_priority(s: &str) -> ScanPriority {
    match s.to_ascii_lowercase().as_str() {
        "urgent" => ScanPriority::Urgent,
        "high" => ScanPriority::High,
        "low" => ScanPriority::Low,
        _ => ScanPriority::Normal,
    }
}

fn parse_ports(s: &str) -> Vec<u16> {
    s.split(',').filter_map(|p| p.trim().parse::<u16>().ok()).collect()
}

async fn scan(config_path: PathBuf, start_ip: Ipv4Addr, end_ip: Ipv4Addr, ports: &str, priority: &str, use_cache: bool) {
    let Some(core) = load_core(config_path).await else { return };
    core.scans.start().await;

    let range = ScanRange::new(start_ip, end_ip, parse_ports(ports));
    let methods = vec![ScanMethod::PingSweep, ScanMethod::PortScan, ScanMethod::ProtocolDetect, ScanMethod::OnvifDiscovery];
    let scan_id = core.scans.start_scan(range, methods, parse_priority(priority), use_cache);
    println!("Scan {} started over {} hosts", scan_id, end_ip_distance(start_ip, end_ip));

    loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let Some(snapshot) = core.scans.scan_status(scan_id) else {
            warn!(%scan_id, "scan disappeared before completion");
            break;
        };
        print!(
            "\rprogress: {}/{} hosts, {} camera(s) found   ",
            snapshot.current, snapshot.total, snapshot.cameras_found
        );
        let _ = std::io::stdout().flush();
        if matches!(snapshot.state, ScanState::Completed | ScanState::Cancelled | ScanState::Failed) {
            println!();
            for result in snapshot.results.iter().filter(|r| r.is_camera_candidate) {
                println!("  candidate: {} protocol={:?} ports={:?}", result.ip, result.protocol, result.open_ports);
            }
            break;
        }
    }

    core.scans.stop().await;
}

fn end_ip_distance(start: Ipv4Addr, end: Ipv4Addr) -> u32 {
    u32::from(end).saturating_sub(u32::from(start)) + 1
}

async fn snapshot(config_path: PathBuf, camera_entry_id: &str, output: &PathBuf) {
    let Some(core) = load_core(config_path).await else { return };
    let Some(camera) = core.camera_by_entry_id(camera_entry_id) else {
        eprintln!("Unknown camera id '{camera_entry_id}'");
        std::process::exit(1);
    };
    let camera_id = camera.camera_id;

    if let Err(e) = core.orchestrator.connect_camera(camera, ConnectionKind::Stream).await {
        eprintln!("Failed to connect: {e}");
        std::process::exit(1);
    }

    match core.orchestrator.capture_snapshot(camera_id).await {
        Ok(Some(bytes)) => {
            if let Err(e) = std::fs::write(output, &bytes) {
                eprintln!("Failed to write snapshot: {e}");
                std::process::exit(1);
            }
            core.persist_snapshot(camera_id, &bytes).await;
            println!("Wrote {} bytes to {}", bytes.len(), output.display());
        }
        Ok(None) => {
            eprintln!("Camera returned no snapshot");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Snapshot failed: {e}");
            std::process::exit(1);
        }
    }

    core.orchestrator.disconnect_camera(camera_id).await;
}

fn parse_ptz_direction(s: &str) -> Option<PtzDirection> {
    match s.to_ascii_lowercase().as_str() {
        "up" => Some(PtzDirection::Up),
        "down" => Some(PtzDirection::Down),
        "left" => Some(PtzDirection::Left),
        "right" => Some(PtzDirection::Right),
        "zoom_in" | "zoomin" => Some(PtzDirection::ZoomIn),
        "zoom_out" | "zoomout" => Some(PtzDirection::ZoomOut),
        _ => None,
    }
}

async fn ptz(config_path: PathBuf, camera_entry_id: &str, direction: &str, speed: u8) {
    let Some(core) = load_core(config_path).await else { return };
    let Some(dir) = parse_ptz_direction(direction) else {
        eprintln!("Unknown PTZ direction '{direction}'");
        std::process::exit(1);
    };
    let Some(camera) = core.camera_by_entry_id(camera_entry_id) else {
        eprintln!("Unknown camera id '{camera_entry_id}'");
        std::process::exit(1);
    };
    let camera_id = camera.camera_id;

    if let Err(e) = core.orchestrator.connect_camera(camera, ConnectionKind::Control).await {
        eprintln!("Failed to connect: {e}");
        std::process::exit(1);
    }

    match core.orchestrator.ptz_control(camera_id, dir, speed).await {
        Ok(ok) => println!("PTZ {} -> {}", direction, ok),
        Err(e) => {
            eprintln!("PTZ command failed: {e}");
            std::process::exit(1);
        }
    }

    core.orchestrator.disconnect_camera(camera_id).await;
}
