// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Typed Event Bus (§4.H): publish/subscribe conduit between the core and
//! the (out-of-scope) API layer, with per-stream rate limiting on
//! `frame-update` and a mock sink required for tests.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::camera::Capabilities;
use crate::stream::pipeline::StreamMetricsSnapshot;

/// A single published event. Variant name is the event's topic (see
/// [`Event::topic`]) and matches the names used in §4.H.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event {
    PresenterReady { capabilities: Capabilities },
    StreamStatus { camera_id: Uuid, status: String, details: Option<String> },
    FrameUpdate { camera_id: Uuid, #[serde(skip)] frame: Bytes, sequence: u64 },
    StreamMetrics { camera_id: Uuid, metrics: StreamMetricsSnapshot },
    StreamError { camera_id: Uuid, kind: String, message: String },
    ScanProgress { scan_id: Uuid, current: usize, total: usize, message: String },
    ScanCompleted { scan_id: Uuid, cameras_found: usize },
}

impl Event {
    pub fn topic(&self) -> &'static str {
        match self {
            Event::PresenterReady { .. } => "presenter-ready",
            Event::StreamStatus { .. } => "stream-status",
            Event::FrameUpdate { .. } => "frame-update",
            Event::StreamMetrics { .. } => "stream-metrics",
            Event::StreamError { .. } => "stream-error",
            Event::ScanProgress { .. } => "scan-progress",
            Event::ScanCompleted { .. } => "scan-completed",
        }
    }
}

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

const WILDCARD: &str = "*";

/// Per-(camera_id, topic) last-emit timestamp for frame-update throttling.
/// §4.C: "a per-topic `last_emit_ns` timestamp; a monotonic clock; drop (not
/// queue) throttled `frame-update` events."
struct Throttle {
    min_interval: Duration,
    last_emit: Mutex<HashMap<Uuid, Instant>>,
}

/// The Event Bus. Cheaply cloneable; all state is behind `Arc`.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    subscribers: Mutex<HashMap<String, Vec<(u64, Callback)>>>,
    next_id: AtomicI64,
    throttle: Throttle,
    frame_seq: Mutex<HashMap<Uuid, u64>>,
}

impl EventBus {
    pub fn new(min_emit_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(0),
                throttle: Throttle { min_interval: min_emit_interval, last_emit: Mutex::new(HashMap::new()) },
                frame_seq: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to a topic name or `"*"` for every event. Returns a handle
    /// usable with [`EventBus::unsubscribe`].
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) as u64;
        self.inner
            .subscribers
            .lock()
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        SubscriptionHandle { topic, id }
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if let Some(subs) = self.inner.subscribers.lock().get_mut(&handle.topic) {
            subs.retain(|(id, _)| *id != handle.id);
        }
    }

    /// Publish an event. Non-throttled topics always deliver; `frame-update`
    /// is subject to `min_emit_interval` per `camera_id`.
    pub fn publish(&self, event: Event) {
        if let Event::FrameUpdate { camera_id, .. } = &event {
            if !self.allow_frame(*camera_id) {
                return;
            }
        }
        self.dispatch(event.topic(), &event);
        self.dispatch(WILDCARD, &event);
    }

    /// Convenience for building and publishing a `frame-update` event with a
    /// monotonically increasing per-camera sequence number.
    pub fn publish_frame(&self, camera_id: Uuid, frame: Bytes) {
        let sequence = {
            let mut seqs = self.inner.frame_seq.lock();
            let entry = seqs.entry(camera_id).or_insert(0);
            *entry += 1;
            *entry
        };
        self.publish(Event::FrameUpdate { camera_id, frame, sequence });
    }

    fn allow_frame(&self, camera_id: Uuid) -> bool {
        let now = Instant::now();
        let mut last = self.inner.throttle.last_emit.lock();
        match last.get(&camera_id) {
            Some(prev) if now.duration_since(*prev) < self.inner.throttle.min_interval => false,
            _ => {
                last.insert(camera_id, now);
                true
            }
        }
    }

    fn dispatch(&self, topic: &str, event: &Event) {
        let subs: Vec<Callback> = {
            let guard = self.inner.subscribers.lock();
            match guard.get(topic) {
                Some(v) => v.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return,
            }
        };
        for cb in subs {
            // Catch panics so one faulty subscriber never takes down the bus
            // or propagates into the publisher's call stack.
            if catch_unwind(AssertUnwindSafe(|| cb(event))).is_err() {
                warn!(topic, "event subscriber callback panicked");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    topic: String,
    id: u64,
}

/// Records every published event in order. Required for tests (§4.H).
#[derive(Clone, Default)]
pub struct MockSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach this sink to a bus, subscribing to every topic.
    pub fn attach(&self, bus: &EventBus) -> SubscriptionHandle {
        let events = self.events.clone();
        bus.subscribe(WILDCARD, move |event| {
            events.lock().push(event.clone());
        })
    }

    pub fn all(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn filter_by_topic(&self, topic: &str) -> Vec<Event> {
        self.events.lock().iter().filter(|e| e.topic() == topic).cloned().collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_event(camera_id: Uuid, sequence: u64) -> Event {
        Event::FrameUpdate { camera_id, frame: Bytes::from_static(b"x"), sequence }
    }

    #[test]
    fn mock_sink_records_in_order() {
        let bus = EventBus::new(Duration::from_millis(0));
        let sink = MockSink::new();
        sink.attach(&bus);

        let scan_id = Uuid::new_v4();
        bus.publish(Event::ScanProgress { scan_id, current: 1, total: 10, message: "go".into() });
        bus.publish(Event::ScanCompleted { scan_id, cameras_found: 2 });

        let events = sink.all();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].topic(), "scan-progress");
        assert_eq!(events[1].topic(), "scan-completed");
    }

    #[test]
    fn filter_by_topic_excludes_other_topics() {
        let bus = EventBus::new(Duration::from_millis(0));
        let sink = MockSink::new();
        sink.attach(&bus);

        bus.publish(Event::StreamError { camera_id: Uuid::new_v4(), kind: "x".into(), message: "y".into() });
        bus.publish(Event::ScanCompleted { scan_id: Uuid::new_v4(), cameras_found: 0 });

        assert_eq!(sink.filter_by_topic("stream-error").len(), 1);
        assert_eq!(sink.filter_by_topic("scan-completed").len(), 1);
    }

    #[test]
    fn clear_empties_the_sink() {
        let bus = EventBus::new(Duration::from_millis(0));
        let sink = MockSink::new();
        sink.attach(&bus);
        bus.publish(Event::ScanCompleted { scan_id: Uuid::new_v4(), cameras_found: 0 });
        assert!(!sink.is_empty());
        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn frame_update_is_rate_limited_per_camera() {
        let bus = EventBus::new(Duration::from_millis(50));
        let sink = MockSink::new();
        sink.attach(&bus);
        let cam = Uuid::new_v4();

        bus.publish(frame_event(cam, 1));
        bus.publish(frame_event(cam, 2)); // too soon, dropped
        assert_eq!(sink.filter_by_topic("frame-update").len(), 1);
    }

    #[test]
    fn frame_update_throttling_is_independent_per_camera() {
        let bus = EventBus::new(Duration::from_millis(50));
        let sink = MockSink::new();
        sink.attach(&bus);
        let cam_a = Uuid::new_v4();
        let cam_b = Uuid::new_v4();

        bus.publish(frame_event(cam_a, 1));
        bus.publish(frame_event(cam_b, 1));
        assert_eq!(sink.filter_by_topic("frame-update").len(), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new(Duration::from_millis(0));
        let sink = MockSink::new();
        let handle = sink.attach(&bus);
        bus.unsubscribe(&handle);
        bus.publish(Event::ScanCompleted { scan_id: Uuid::new_v4(), cameras_found: 0 });
        assert!(sink.is_empty());
    }
}
