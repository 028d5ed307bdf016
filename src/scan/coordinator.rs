// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Coordinates scan jobs: a priority queue bounded by concurrency, a
//! TTL cache keyed by scan range, and incremental network analysis used
//! to suggest future scan ranges.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::interval;
use uuid::Uuid;

use crate::events::{Event, EventBus};
use crate::persistence::{PersistenceCore, ScanRecord};

use super::engine::{ScanEngine, ScanJob, ScanJobSnapshot};
use super::{HostResult, ScanMethod, ScanPriority, ScanRange, ScanState};

#[derive(Debug, Clone)]
pub struct ScanCoordinatorConfig {
    pub max_concurrent_scans: usize,
    pub cache_ttl: Duration,
    pub max_cache_entries: usize,
    pub history_retention: Duration,
    pub max_completed_scans: usize,
    pub scheduler_interval: Duration,
    pub cleanup_interval: Duration,
    pub data_dir: PathBuf,
}

impl Default for ScanCoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans: 3,
            cache_ttl: Duration::from_secs(24 * 3600),
            max_cache_entries: 1000,
            history_retention: Duration::from_secs(30 * 24 * 3600),
            max_completed_scans: 20,
            scheduler_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(3600),
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedScanResult {
    scan_id: Uuid,
    timestamp: DateTime<Utc>,
    range: ScanRange,
    results: Vec<HostResult>,
    cameras_found: usize,
}

impl CachedScanResult {
    fn is_expired(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.timestamp);
        age.to_std().unwrap_or(Duration::ZERO) > ttl
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanHistoryEntry {
    pub scan_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub range: ScanRange,
    pub methods: Vec<ScanMethod>,
    pub duration_secs: f64,
    pub cameras_found: usize,
    pub total_hosts: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkAnalysis {
    pub common_ip_ranges: Vec<String>,
    pub frequent_ports: Vec<u16>,
    pub protocol_distribution: HashMap<String, f64>,
    pub last_analysis: Option<DateTime<Utc>>,
    network_hits: HashMap<String, u64>,
    port_hits: HashMap<u16, u64>,
}

impl NetworkAnalysis {
    fn record(&mut self, range: &ScanRange, results: &[HostResult]) {
        let network = slash24_of(range.start_ip);
        *self.network_hits.entry(network).or_insert(0) += 1;

        for result in results {
            for port in &result.open_ports {
                *self.port_hits.entry(*port).or_insert(0) += 1;
            }
        }

        let mut networks: Vec<(&String, &u64)> = self.network_hits.iter().collect();
        networks.sort_by(|a, b| b.1.cmp(a.1));
        self.common_ip_ranges = networks.into_iter().map(|(k, _)| k.clone()).collect();

        let mut ports: Vec<(&u16, &u64)> = self.port_hits.iter().collect();
        ports.sort_by(|a, b| b.1.cmp(a.1));
        self.frequent_ports = ports.into_iter().map(|(p, _)| *p).collect();

        let total = results.len().max(1) as f64;
        let mut protocol_counts: HashMap<String, u64> = HashMap::new();
        for result in results {
            if let Some(proto) = result.protocol {
                *protocol_counts.entry(format!("{proto:?}")).or_insert(0) += 1;
            }
        }
        self.protocol_distribution = protocol_counts
            .into_iter()
            .map(|(k, v)| (k, v as f64 / total * 100.0))
            .collect();

        self.last_analysis = Some(Utc::now());
    }

    /// Finds the most-scanned `/24` overlapping `base_ip` and proposes a
    /// range covering it with the five most frequently open ports.
    pub fn get_optimal_scan_range(&self, base_ip: Ipv4Addr) -> Option<ScanRange> {
        if self.common_ip_ranges.is_empty() {
            return None;
        }
        let base_network = slash24_of(base_ip);
        let network = self
            .common_ip_ranges
            .iter()
            .find(|candidate| **candidate == base_network)?;
        let (start, end) = parse_slash24(network)?;
        let ports = if self.frequent_ports.is_empty() {
            vec![80, 554, 8080]
        } else {
            self.frequent_ports.iter().take(5).copied().collect()
        };
        Some(ScanRange::new(start, end, ports))
    }
}

fn slash24_of(ip: Ipv4Addr) -> String {
    let octets = ip.octets();
    format!("{}.{}.{}.0/24", octets[0], octets[1], octets[2])
}

fn parse_slash24(network: &str) -> Option<(Ipv4Addr, Ipv4Addr)> {
    let base = network.strip_suffix("/24")?;
    let base: Ipv4Addr = base.parse().ok()?;
    let octets = base.octets();
    let start = Ipv4Addr::new(octets[0], octets[1], octets[2], 0);
    let end = Ipv4Addr::new(octets[0], octets[1], octets[2], 255);
    Some((start, end))
}

struct QueuedJob {
    job: Arc<ScanJob>,
}

struct CoordinatorState {
    running: HashMap<Uuid, Arc<ScanJob>>,
    queue: VecDeque<QueuedJob>,
    completed: VecDeque<Arc<ScanJob>>,
    cache: HashMap<String, CachedScanResult>,
    history: VecDeque<ScanHistoryEntry>,
    analysis: NetworkAnalysis,
}

/// Owns scan scheduling, result caching and network analysis. One
/// instance is shared across the API surface and background loops.
pub struct ScanCoordinator {
    config: ScanCoordinatorConfig,
    engine: ScanEngine,
    event_bus: EventBus,
    state: Mutex<CoordinatorState>,
    running_flag: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    persistence: Option<Arc<PersistenceCore>>,
}

impl ScanCoordinator {
    /// `persistence` is optional so unit tests can build a coordinator
    /// without standing up a database; `Core::new` always supplies one so
    /// every completed job's `scans` row gets recorded (§2 control flow:
    /// "Persistence Core (G) is consulted/updated by ... (F)").
    pub fn new(config: ScanCoordinatorConfig, event_bus: EventBus, persistence: Option<Arc<PersistenceCore>>) -> Arc<Self> {
        let engine = ScanEngine::new(event_bus.clone());
        Arc::new(Self {
            config,
            engine,
            event_bus,
            state: Mutex::new(CoordinatorState {
                running: HashMap::new(),
                queue: VecDeque::new(),
                completed: VecDeque::new(),
                cache: HashMap::new(),
                history: VecDeque::new(),
                analysis: NetworkAnalysis::default(),
            }),
            running_flag: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
            persistence,
        })
    }

    /// Loads persisted cache/history/analysis and starts the scheduler
    /// and cleanup loops. Corrupt persistence files are logged and
    /// skipped rather than treated as fatal.
    pub async fn start(self: &Arc<Self>) {
        if self.running_flag.swap(true, Ordering::SeqCst) {
            return;
        }
        self.load_persistent_data();

        let scheduler = {
            let this = self.clone();
            tokio::spawn(async move { this.scheduler_loop().await })
        };
        let cleanup = {
            let this = self.clone();
            tokio::spawn(async move { this.cleanup_loop().await })
        };
        self.tasks.lock().extend([scheduler, cleanup]);
        tracing::info!("scan coordinator started");
    }

    pub async fn stop(self: &Arc<Self>) {
        if !self.running_flag.swap(false, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let job_ids: Vec<Uuid> = self.state.lock().running.keys().copied().collect();
        for id in job_ids {
            self.cancel_scan(id);
        }
        self.save_persistent_data();
        tracing::info!("scan coordinator stopped");
    }

    /// Enqueues (or immediately runs, if under the concurrency cap) a
    /// scan over `range`. Returns a cached result's scan id without
    /// touching the network when `use_cache` hits a fresh entry.
    pub fn start_scan(
        self: &Arc<Self>,
        range: ScanRange,
        methods: Vec<ScanMethod>,
        priority: ScanPriority,
        use_cache: bool,
    ) -> Uuid {
        if use_cache {
            if let Some(cached) = self.cached_result(&range) {
                self.event_bus.publish(Event::ScanCompleted {
                    scan_id: cached.scan_id,
                    cameras_found: cached.cameras_found,
                });
                return cached.scan_id;
            }
        }

        let job = Arc::new(ScanJob::new(range, methods, priority));
        let job_id = job.job_id;

        let mut state = self.state.lock();
        if state.running.len() < self.config.max_concurrent_scans {
            state.running.insert(job_id, job.clone());
            drop(state);
            self.spawn_job(job);
        } else {
            insert_by_priority(&mut state.queue, job);
        }
        job_id
    }

    fn spawn_job(self: &Arc<Self>, job: Arc<ScanJob>) {
        let this = self.clone();
        let job_for_task = job.clone();
        tokio::spawn(async move {
            this.engine.run(job_for_task.clone()).await;
            this.on_job_finished(job_for_task).await;
        });
    }

    async fn on_job_finished(self: &Arc<Self>, job: Arc<ScanJob>) {
        let snapshot = job.snapshot();
        let range = job.range.clone();
        let methods = job.methods.clone();

        {
            let mut state = self.state.lock();
            state.running.remove(&job.job_id);

            if matches!(snapshot.state, ScanState::Completed) {
                let key = range.cache_key();
                state.cache.insert(
                    key,
                    CachedScanResult {
                        scan_id: job.job_id,
                        timestamp: Utc::now(),
                        range: range.clone(),
                        results: snapshot.results.clone(),
                        cameras_found: snapshot.cameras_found,
                    },
                );
                if state.cache.len() > self.config.max_cache_entries {
                    evict_cache(&mut state.cache, self.config.max_cache_entries, self.config.cache_ttl);
                }

                state.analysis.record(&range, &snapshot.results);

                state.history.push_back(ScanHistoryEntry {
                    scan_id: job.job_id,
                    timestamp: Utc::now(),
                    range,
                    methods,
                    duration_secs: (Utc::now() - job.created_at).num_milliseconds() as f64 / 1000.0,
                    cameras_found: snapshot.cameras_found,
                    total_hosts: snapshot.total,
                });
                if state.history.len() > 100 {
                    let excess = state.history.len() - 100;
                    for _ in 0..excess {
                        state.history.pop_front();
                    }
                }
            }

            state.completed.push_back(job.clone());
            if state.completed.len() > self.config.max_completed_scans {
                state.completed.pop_front();
            }
        }

        if matches!(snapshot.state, ScanState::Completed) {
            self.record_scan_result(&job, &snapshot).await;
        }

        self.drain_queue();
    }

    /// Writes the completed job's `scans` row (§2 control flow, §6 schema).
    /// Logged and swallowed on failure, same posture as every other
    /// background-worker persistence write (§7).
    async fn record_scan_result(&self, job: &ScanJob, snapshot: &ScanJobSnapshot) {
        let Some(persistence) = &self.persistence else { return };
        let range = &job.range;
        let duration_seconds = (Utc::now() - job.created_at).num_milliseconds() as f64 / 1000.0;
        let ports_found: i64 = snapshot.results.iter().map(|r| r.open_ports.len() as i64).sum();
        let mut protocols: Vec<String> =
            snapshot.results.iter().filter_map(|r| r.protocol.map(|p| p.to_string())).collect();
        protocols.sort();
        protocols.dedup();

        let record = ScanRecord {
            scan_id: job.job_id.to_string(),
            target_ip: format!("{}-{}", range.start_ip, range.end_ip),
            timestamp: Utc::now(),
            duration_seconds,
            ports_scanned: range.ports.len() as i64,
            ports_found,
            authentication_tested: false,
            successful_auths: 0,
            protocols_detected: serde_json::to_value(&protocols).unwrap_or_else(|_| serde_json::json!([])),
            results: serde_json::to_value(&snapshot.results).unwrap_or_else(|_| serde_json::json!([])),
            created_at: job.created_at,
        };
        if let Err(err) = persistence.record_scan(record).await {
            tracing::warn!(scan_id = %job.job_id, error = %err, "failed to persist scan result");
        }
    }

    fn drain_queue(self: &Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock();
                if state.running.len() >= self.config.max_concurrent_scans {
                    None
                } else if let Some(queued) = state.queue.pop_front() {
                    state.running.insert(queued.job.job_id, queued.job.clone());
                    Some(queued.job)
                } else {
                    None
                }
            };
            match next {
                Some(job) => self.spawn_job(job),
                None => break,
            }
        }
    }

    pub fn cancel_scan(self: &Arc<Self>, scan_id: Uuid) -> bool {
        let mut state = self.state.lock();
        if let Some(job) = state.running.get(&scan_id) {
            job.cancel();
            return true;
        }
        if let Some(pos) = state.queue.iter().position(|q| q.job.job_id == scan_id) {
            let queued = state.queue.remove(pos).unwrap();
            queued.job.cancel();
            state.completed.push_back(queued.job);
            return true;
        }
        false
    }

    pub fn scan_status(&self, scan_id: Uuid) -> Option<ScanJobSnapshot> {
        let state = self.state.lock();
        if let Some(job) = state.running.get(&scan_id) {
            return Some(job.snapshot());
        }
        state
            .completed
            .iter()
            .find(|job| job.job_id == scan_id)
            .map(|job| job.snapshot())
    }

    pub fn scan_results(&self, scan_id: Uuid) -> Option<Vec<HostResult>> {
        self.scan_status(scan_id).map(|snapshot| snapshot.results)
    }

    pub fn history(&self, limit: usize) -> Vec<ScanHistoryEntry> {
        let state = self.state.lock();
        state.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn network_analysis(&self) -> NetworkAnalysis {
        self.state.lock().analysis.clone()
    }

    pub fn optimal_scan_range(&self, base_ip: Ipv4Addr) -> Option<ScanRange> {
        self.state.lock().analysis.get_optimal_scan_range(base_ip)
    }

    fn cached_result(&self, range: &ScanRange) -> Option<CachedScanResult> {
        let key = range.cache_key();
        let mut state = self.state.lock();
        match state.cache.get(&key) {
            Some(cached) if !cached.is_expired(self.config.cache_ttl) => Some(cached.clone()),
            Some(_) => {
                state.cache.remove(&key);
                None
            }
            None => None,
        }
    }

    async fn scheduler_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.scheduler_interval);
        while self.running_flag.load(Ordering::SeqCst) {
            ticker.tick().await;
            self.drain_queue();
        }
    }

    async fn cleanup_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.cleanup_interval);
        while self.running_flag.load(Ordering::SeqCst) {
            ticker.tick().await;
            let mut state = self.state.lock();
            evict_cache(&mut state.cache, self.config.max_cache_entries, self.config.cache_ttl);
            let retention = chrono::Duration::from_std(self.config.history_retention)
                .unwrap_or_else(|_| chrono::Duration::zero());
            let cutoff = Utc::now() - retention;
            state.history.retain(|entry| entry.timestamp > cutoff);
        }
    }

    fn load_persistent_data(&self) {
        let dir = &self.config.data_dir;
        load_json(&dir.join("scan_cache.json"), |cache| {
            self.state.lock().cache = cache;
        });
        load_json(&dir.join("scan_history.json"), |history: Vec<ScanHistoryEntry>| {
            self.state.lock().history = history.into();
        });
        load_json(&dir.join("network_analysis.json"), |analysis| {
            self.state.lock().analysis = analysis;
        });
    }

    fn save_persistent_data(&self) {
        let dir = &self.config.data_dir;
        if let Err(err) = std::fs::create_dir_all(dir) {
            tracing::warn!(error = %err, "failed to create scan data directory");
            return;
        }
        let state = self.state.lock();
        save_json(&dir.join("scan_cache.json"), &state.cache);
        save_json(
            &dir.join("scan_history.json"),
            &state.history.iter().cloned().collect::<Vec<_>>(),
        );
        save_json(&dir.join("network_analysis.json"), &state.analysis);
    }
}

fn insert_by_priority(queue: &mut VecDeque<QueuedJob>, job: Arc<ScanJob>) {
    // Strict `<`: a new job is inserted after every already-queued job of the
    // same or higher priority, so FIFO order within one priority tier holds.
    let insert_pos = queue
        .iter()
        .position(|existing| job.priority < existing.job.priority)
        .unwrap_or(queue.len());
    queue.insert(insert_pos, QueuedJob { job });
}

fn evict_cache(cache: &mut HashMap<String, CachedScanResult>, max_entries: usize, ttl: Duration) {
    cache.retain(|_, cached| !cached.is_expired(ttl));
    if cache.len() <= max_entries {
        return;
    }
    let mut entries: Vec<(String, DateTime<Utc>)> = cache
        .iter()
        .map(|(k, v)| (k.clone(), v.timestamp))
        .collect();
    entries.sort_by_key(|(_, ts)| *ts);
    let excess = cache.len() - max_entries;
    for (key, _) in entries.into_iter().take(excess) {
        cache.remove(&key);
    }
}

fn load_json<T, F>(path: &Path, apply: F)
where
    T: for<'de> Deserialize<'de>,
    F: FnOnce(T),
{
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(value) => apply(value),
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping corrupt persistence file"),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "failed to read persistence file"),
    }
}

fn save_json<T: Serialize>(path: &Path, value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            if let Err(err) = std::fs::write(path, json) {
                tracing::warn!(path = %path.display(), error = %err, "failed to write persistence file");
            }
        }
        Err(err) => tracing::warn!(error = %err, "failed to serialize persistence data"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    fn bus() -> EventBus {
        EventBus::new(Duration::from_millis(0))
    }

    fn range(a: &str, b: &str) -> ScanRange {
        ScanRange::new(a.parse().unwrap(), b.parse().unwrap(), vec![554, 80])
    }

    #[test]
    fn cache_key_is_stable_regardless_of_port_order() {
        let a = ScanRange::new("10.0.0.1".parse().unwrap(), "10.0.0.5".parse().unwrap(), vec![554, 80]);
        let b = ScanRange::new("10.0.0.1".parse().unwrap(), "10.0.0.5".parse().unwrap(), vec![80, 554]);
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn insert_by_priority_keeps_urgent_ahead_and_fifo_within_tier() {
        let mut queue = VecDeque::new();
        let normal_a = Arc::new(ScanJob::new(range("1.1.1.1", "1.1.1.1"), vec![], ScanPriority::Normal));
        let normal_b = Arc::new(ScanJob::new(range("1.1.1.2", "1.1.1.2"), vec![], ScanPriority::Normal));
        let urgent = Arc::new(ScanJob::new(range("1.1.1.3", "1.1.1.3"), vec![], ScanPriority::Urgent));

        insert_by_priority(&mut queue, normal_a.clone());
        insert_by_priority(&mut queue, normal_b.clone());
        insert_by_priority(&mut queue, urgent.clone());

        let ids: Vec<Uuid> = queue.iter().map(|q| q.job.job_id).collect();
        assert_eq!(ids, vec![urgent.job_id, normal_a.job_id, normal_b.job_id]);
    }

    #[test]
    fn evict_cache_drops_expired_before_oldest() {
        let mut cache = HashMap::new();
        cache.insert(
            "stale".to_string(),
            CachedScanResult {
                scan_id: Uuid::new_v4(),
                timestamp: Utc::now() - chrono::Duration::hours(48),
                range: range("1.1.1.1", "1.1.1.1"),
                results: vec![],
                cameras_found: 0,
            },
        );
        cache.insert(
            "fresh".to_string(),
            CachedScanResult {
                scan_id: Uuid::new_v4(),
                timestamp: Utc::now(),
                range: range("1.1.1.2", "1.1.1.2"),
                results: vec![],
                cameras_found: 0,
            },
        );
        evict_cache(&mut cache, 10, Duration::from_secs(3600));
        assert!(cache.contains_key("fresh"));
        assert!(!cache.contains_key("stale"));
    }

    #[test]
    fn network_analysis_recommends_optimal_range_once_seen() {
        let mut analysis = NetworkAnalysis::default();
        let seen = range("192.168.1.1", "192.168.1.254");
        let result = HostResult {
            ip: "192.168.1.10".parse().unwrap(),
            reachable: true,
            open_ports: vec![554],
            protocol: None,
            onvif_candidate: false,
            is_camera_candidate: true,
        };
        analysis.record(&seen, std::slice::from_ref(&result));

        let suggestion = analysis
            .get_optimal_scan_range("192.168.1.200".parse().unwrap())
            .expect("expected a recommended range");
        assert_eq!(suggestion.start_ip, "192.168.1.0".parse::<Ipv4Addr>().unwrap());
        assert_eq!(suggestion.end_ip, "192.168.1.255".parse::<Ipv4Addr>().unwrap());
        assert!(suggestion.ports.contains(&554));
    }

    #[test]
    fn start_scan_cache_hit_emits_scan_completed_synchronously() {
        let event_bus = bus();
        let sink = crate::events::MockSink::new();
        sink.attach(&event_bus);

        let coordinator = ScanCoordinator::new(ScanCoordinatorConfig::default(), event_bus, None);
        let seed_range = range("192.168.1.1", "192.168.1.10");
        let cached_scan_id = Uuid::new_v4();
        coordinator.state.lock().cache.insert(
            seed_range.cache_key(),
            CachedScanResult {
                scan_id: cached_scan_id,
                timestamp: Utc::now(),
                range: seed_range.clone(),
                results: vec![],
                cameras_found: 3,
            },
        );

        let returned_id = coordinator.start_scan(seed_range, vec![ScanMethod::PingSweep], ScanPriority::Normal, true);
        assert_eq!(returned_id, cached_scan_id);
        assert!(coordinator.state.lock().running.is_empty());

        let completed = sink.filter_by_topic("scan-completed");
        assert_eq!(completed.len(), 1);
        match &completed[0] {
            Event::ScanCompleted { scan_id, cameras_found } => {
                assert_eq!(*scan_id, cached_scan_id);
                assert_eq!(*cameras_found, 3);
            }
            other => panic!("expected ScanCompleted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_scan_over_concurrency_cap_is_queued_not_lost() {
        let config = ScanCoordinatorConfig {
            max_concurrent_scans: 0,
            ..ScanCoordinatorConfig::default()
        };
        let coordinator = ScanCoordinator::new(config, bus(), None);
        let id = coordinator.start_scan(
            range("127.0.0.1", "127.0.0.1"),
            vec![ScanMethod::PingSweep],
            ScanPriority::Normal,
            false,
        );
        let state = coordinator.state.lock();
        assert!(state.queue.iter().any(|q| q.job.job_id == id));
    }
}
