// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Network discovery: probing IP ranges for cameras and caching the results.

pub mod coordinator;
pub mod engine;

pub use coordinator::{ScanCoordinator, ScanCoordinatorConfig};
pub use engine::{ScanEngine, ScanJob, ScanJobSnapshot};

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::camera::ProtocolType;

/// An inclusive IPv4 range plus the ports a port-scan should probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanRange {
    pub start_ip: Ipv4Addr,
    pub end_ip: Ipv4Addr,
    pub ports: Vec<u16>,
}

impl ScanRange {
    pub fn new(start_ip: Ipv4Addr, end_ip: Ipv4Addr, ports: Vec<u16>) -> Self {
        Self {
            start_ip,
            end_ip,
            ports,
        }
    }

    /// Cache key stable across port ordering: `start_end_[sorted,ports]`.
    pub fn cache_key(&self) -> String {
        let mut ports = self.ports.clone();
        ports.sort_unstable();
        format!("{}_{}_{:?}", self.start_ip, self.end_ip, ports)
    }

    pub fn hosts(&self) -> Vec<Ipv4Addr> {
        let start = u32::from(self.start_ip);
        let end = u32::from(self.end_ip);
        if start > end {
            return Vec::new();
        }
        (start..=end).map(Ipv4Addr::from).collect()
    }

    pub fn host_count(&self) -> usize {
        let start = u32::from(self.start_ip);
        let end = u32::from(self.end_ip);
        if start > end {
            0
        } else {
            (end - start + 1) as usize
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMethod {
    PingSweep,
    PortScan,
    ProtocolDetect,
    OnvifDiscovery,
}

/// Ordered so that `Urgent < High < Normal < Low` — derived `Ord` compares
/// discriminants in declaration order, which gives urgent jobs first in a
/// min-first priority queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScanPriority {
    Urgent,
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    Queued,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// A single host's probe outcome, accumulated as methods run against it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostResult {
    pub ip: Ipv4Addr,
    pub reachable: bool,
    pub open_ports: Vec<u16>,
    pub protocol: Option<ProtocolType>,
    pub onvif_candidate: bool,
    pub is_camera_candidate: bool,
}
