// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Per-connection streaming pipeline (§4.C): a producer-side ring buffer,
//! a subscriber fan-out that never blocks the producer, and a 1 Hz metrics
//! loop computing FPS/latency/bandwidth/health over a 30-sample window.
//!
//! The fan-out uses one bounded `mpsc` channel per subscriber with
//! `try_send` rather than the shared ring's drop counter: a slow subscriber
//! only ever loses its own frames, never another subscriber's or the
//! producer's (open question resolved in favor of per-subscriber accounting).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::events::{Event, EventBus};

/// Sliding window depth for FPS/latency samples (§4.C: "30-sample window").
const METRICS_WINDOW: usize = 30;
/// Metrics loop cadence (§4.C default).
const METRICS_INTERVAL: Duration = Duration::from_secs(1);
/// Per-subscriber channel depth before `try_send` starts dropping for that
/// subscriber only.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamStatus {
    Idle,
    Active,
    Error,
    Stopped,
}

/// One frame as it flows through the pipeline.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub captured_at: Instant,
    pub sequence: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamMetricsSnapshot {
    pub current_fps: f64,
    pub avg_fps: f64,
    pub avg_latency_ms: f64,
    pub bandwidth_bytes_per_sec: f64,
    pub dropped_frames: u64,
    pub error_count: u64,
    pub health_score: f64,
}

struct Sample {
    at: Instant,
    size: usize,
    latency: Duration,
}

struct Subscriber {
    sender: mpsc::Sender<Frame>,
    dropped: u64,
}

/// One active stream's runtime state. Owned by the connection that produces
/// it; the connection's `FrameSink` is a closure that calls [`Self::push_frame`].
pub struct StreamPipeline {
    camera_id: Uuid,
    target_fps: u32,
    event_bus: EventBus,

    ring: Mutex<VecDeque<Frame>>,
    ring_capacity: usize,
    dropped_frames: AtomicU64,
    error_count: AtomicU64,
    sequence: AtomicU64,

    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_subscriber_id: AtomicU64,

    samples: Mutex<VecDeque<Sample>>,
    status: Mutex<StreamStatus>,
    metrics_task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamPipeline {
    pub fn new(camera_id: Uuid, target_fps: u32, buffer_size: usize, event_bus: EventBus) -> Arc<Self> {
        let pipeline = Arc::new(Self {
            camera_id,
            target_fps,
            event_bus,
            ring: Mutex::new(VecDeque::with_capacity(buffer_size)),
            ring_capacity: buffer_size.max(1),
            dropped_frames: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(0),
            samples: Mutex::new(VecDeque::with_capacity(METRICS_WINDOW)),
            status: Mutex::new(StreamStatus::Idle),
            metrics_task: Mutex::new(None),
        });
        pipeline.clone().spawn_metrics_loop();
        *pipeline.status.lock() = StreamStatus::Active;
        pipeline
    }

    /// The producer's entry point. Installed as a [`crate::protocol::FrameSink`]
    /// closure; must never block or panic on subscriber backpressure.
    pub fn push_frame(&self, data: Bytes) {
        let now = Instant::now();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let size = data.len();
        let frame = Frame { data, captured_at: now, sequence };

        {
            let mut ring = self.ring.lock();
            if ring.len() >= self.ring_capacity {
                ring.pop_front();
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            }
            ring.push_back(frame.clone());
        }

        {
            let mut subs = self.subscribers.lock();
            subs.retain(|_, sub| match sub.sender.try_send(frame.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sub.dropped += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }

        {
            let mut samples = self.samples.lock();
            if samples.len() >= METRICS_WINDOW {
                samples.pop_front();
            }
            samples.push_back(Sample { at: now, size, latency: now.duration_since(frame.captured_at) });
        }

        self.event_bus.publish_frame(self.camera_id, frame.data);
    }

    /// Register a new subscriber; returns a [`StreamHandle`] the caller reads
    /// frames from. Dropping the handle unsubscribes.
    pub fn subscribe(self: &Arc<Self>) -> StreamHandle {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.subscribers.lock().insert(id, Subscriber { sender: tx, dropped: 0 });
        StreamHandle { id, receiver: rx, pipeline: self.clone() }
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().remove(&id);
    }

    /// Frames dropped for `subscriber_id` specifically (never aggregated into
    /// the shared ring's `dropped_frames`).
    pub fn subscriber_dropped_count(&self, subscriber_id: u64) -> Option<u64> {
        self.subscribers.lock().get(&subscriber_id).map(|s| s.dropped)
    }

    pub fn status(&self) -> StreamStatus {
        *self.status.lock()
    }

    /// Producer error path (§4.C: "producer error → status = Error, emit
    /// stream-error, stop").
    pub fn record_error(&self, kind: &str, message: &str) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        *self.status.lock() = StreamStatus::Error;
        self.event_bus.publish(Event::StreamError {
            camera_id: self.camera_id,
            kind: kind.to_string(),
            message: message.to_string(),
        });
    }

    /// Flushes subscribers, cancels the metrics loop, resets the ring, and
    /// emits a final status event.
    pub fn stop(&self) {
        *self.status.lock() = StreamStatus::Stopped;
        self.subscribers.lock().clear();
        self.ring.lock().clear();
        if let Some(task) = self.metrics_task.lock().take() {
            task.abort();
        }
        self.event_bus.publish(Event::StreamStatus {
            camera_id: self.camera_id,
            status: "stopped".into(),
            details: None,
        });
    }

    pub fn metrics_snapshot(&self) -> StreamMetricsSnapshot {
        compute_snapshot(
            &self.samples.lock(),
            self.target_fps,
            self.dropped_frames.load(Ordering::Relaxed),
            self.error_count.load(Ordering::Relaxed),
        )
    }

    fn spawn_metrics_loop(self: Arc<Self>) {
        let pipeline = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(METRICS_INTERVAL);
            loop {
                interval.tick().await;
                if pipeline.status() == StreamStatus::Stopped {
                    break;
                }
                let snapshot = pipeline.metrics_snapshot();
                pipeline.event_bus.publish(Event::StreamMetrics {
                    camera_id: pipeline.camera_id,
                    metrics: snapshot,
                });
            }
        });
        *self.metrics_task.lock() = Some(handle);
    }
}

/// Pure health-score + window computation (§4.C formula, reproduced verbatim).
fn compute_snapshot(samples: &VecDeque<Sample>, target_fps: u32, dropped_frames: u64, error_count: u64) -> StreamMetricsSnapshot {
    if samples.is_empty() {
        return StreamMetricsSnapshot {
            dropped_frames,
            error_count,
            health_score: 0.0,
            ..Default::default()
        };
    }

    let first = samples.front().unwrap().at;
    let last = samples.back().unwrap().at;
    let elapsed = last.duration_since(first).as_secs_f64().max(1e-6);

    let avg_fps = if samples.len() > 1 { (samples.len() - 1) as f64 / elapsed } else { 0.0 };
    let current_fps = avg_fps;

    let total_bytes: usize = samples.iter().map(|s| s.size).sum();
    let bandwidth_bytes_per_sec = total_bytes as f64 / elapsed;

    let avg_latency_ms = samples.iter().map(|s| s.latency.as_secs_f64() * 1000.0).sum::<f64>() / samples.len() as f64;

    let total_seen = samples.len() as u64 + dropped_frames;
    let drop_rate_percent = if total_seen > 0 { (dropped_frames as f64 / total_seen as f64) * 100.0 } else { 0.0 };

    let fps_penalty = (2.0 * (target_fps as f64 - avg_fps)).max(0.0).min(30.0);
    let drop_penalty = (2.0 * drop_rate_percent).min(20.0);
    let error_penalty = (5.0 * error_count as f64).min(20.0);
    let latency_penalty = ((avg_latency_ms - 200.0) / 10.0).max(0.0).min(20.0);

    let health_score = (100.0 - fps_penalty - drop_penalty - error_penalty - latency_penalty).max(0.0);

    StreamMetricsSnapshot {
        current_fps,
        avg_fps,
        avg_latency_ms,
        bandwidth_bytes_per_sec,
        dropped_frames,
        error_count,
        health_score,
    }
}

/// A subscriber's view onto a [`StreamPipeline`]. Unsubscribes on drop.
pub struct StreamHandle {
    id: u64,
    pub receiver: mpsc::Receiver<Frame>,
    pipeline: Arc<StreamPipeline>,
}

impl StreamHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dropped_count(&self) -> u64 {
        self.pipeline.subscriber_dropped_count(self.id).unwrap_or(0)
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.pipeline.unsubscribe(self.id);
        info!(subscriber_id = self.id, "stream subscriber detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn bus() -> EventBus {
        EventBus::new(StdDuration::from_millis(0))
    }

    #[tokio::test]
    async fn ring_evicts_oldest_and_counts_drops() {
        let pipeline = StreamPipeline::new(Uuid::new_v4(), 15, 2, bus());
        pipeline.push_frame(Bytes::from_static(b"a"));
        pipeline.push_frame(Bytes::from_static(b"b"));
        pipeline.push_frame(Bytes::from_static(b"c"));
        assert_eq!(pipeline.dropped_frames.load(Ordering::Relaxed), 1);
        pipeline.stop();
    }

    #[tokio::test]
    async fn subscriber_receives_frames_independent_of_ring_size() {
        let pipeline = StreamPipeline::new(Uuid::new_v4(), 15, 4, bus());
        let mut handle = pipeline.subscribe();
        pipeline.push_frame(Bytes::from_static(b"x"));
        let frame = handle.receiver.recv().await.unwrap();
        assert_eq!(&frame.data[..], b"x");
        pipeline.stop();
    }

    #[tokio::test]
    async fn slow_subscriber_drops_are_isolated() {
        let pipeline = StreamPipeline::new(Uuid::new_v4(), 15, 64, bus());
        let handle = pipeline.subscribe();
        for _ in 0..(SUBSCRIBER_CHANNEL_CAPACITY + 4) {
            pipeline.push_frame(Bytes::from_static(b"z"));
        }
        assert!(handle.dropped_count() > 0);
        assert_eq!(pipeline.dropped_frames.load(Ordering::Relaxed), 0);
        pipeline.stop();
    }

    #[test]
    fn health_score_matches_formula_for_perfect_stream() {
        let mut samples = VecDeque::new();
        let base = Instant::now();
        for i in 0..10u64 {
            samples.push_back(Sample {
                at: base + StdDuration::from_millis(i * 66),
                size: 1000,
                latency: StdDuration::from_millis(50),
            });
        }
        let snapshot = compute_snapshot(&samples, 15, 0, 0);
        assert!(snapshot.health_score > 90.0);
    }

    #[test]
    fn health_score_penalizes_errors_and_drops() {
        let mut samples = VecDeque::new();
        let base = Instant::now();
        for i in 0..5u64 {
            samples.push_back(Sample {
                at: base + StdDuration::from_millis(i * 200),
                size: 500,
                latency: StdDuration::from_millis(300),
            });
        }
        let clean = compute_snapshot(&samples, 15, 0, 0);
        let degraded = compute_snapshot(&samples, 15, 50, 4);
        assert!(degraded.health_score < clean.health_score);
    }
}
