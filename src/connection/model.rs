// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Connection Model (§4.B): a finite-state machine over one
//! `(camera_id, protocol, kind)` tuple, owning its attempt history and
//! health counters. Owned by the Connection Orchestrator.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::camera::{ProtocolType, RetryPolicy};
use crate::error::{CoreError, Result};
use crate::protocol::{FrameSink, PtzDirection, ProtocolHandler};

/// Bound on attempt history per connection (§3: "last N, N ≤ 100").
pub const MAX_ATTEMPT_HISTORY: usize = 100;

/// What a connection is used for. A camera may hold several connections at
/// once, one per distinct `(protocol, kind)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionKind {
    Stream,
    Control,
    Api,
    Ping,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionKind::Stream => "stream",
            ConnectionKind::Control => "control",
            ConnectionKind::Api => "api",
            ConnectionKind::Ping => "ping",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Streaming,
    Error,
    Unavailable,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Error => "error",
            ConnectionState::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// An immutable record of one `connect`/`test_connection` attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionAttempt {
    pub attempt_id: Uuid,
    pub protocol: ProtocolType,
    pub kind: ConnectionKind,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub success: bool,
    pub error: Option<String>,
    pub response_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    pub alive: bool,
    pub consecutive_failures: u32,
    pub avg_response_time_ms: f64,
    pub last_successful_check: Option<DateTime<Utc>>,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self {
            alive: false,
            consecutive_failures: 0,
            avg_response_time_ms: 0.0,
            last_successful_check: None,
        }
    }
}

/// A read-only snapshot of a [`Connection`], safe to hand across task/lock
/// boundaries without holding the connection's internal lock.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub camera_id: Uuid,
    pub protocol: ProtocolType,
    pub kind: ConnectionKind,
    pub state: ConnectionState,
    pub health: ConnectionHealth,
    pub attempt_count: usize,
}

type StateCallback = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;
type LostCallback = Arc<dyn Fn(&str) + Send + Sync>;
type RestoredCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default, Clone)]
pub struct ConnectionCallbacks {
    pub on_state_changed: Option<StateCallback>,
    pub on_connection_lost: Option<LostCallback>,
    pub on_connection_restored: Option<RestoredCallback>,
}

/// One logical session over one protocol with one kind. State transitions
/// are serialized by an internal lock (§4.B: "per-connection mutex; readers
/// see a consistent snapshot").
pub struct Connection {
    pub camera_id: Uuid,
    pub protocol: ProtocolType,
    pub kind: ConnectionKind,
    handler: tokio::sync::Mutex<Box<dyn ProtocolHandler>>,
    state: Mutex<ConnectionState>,
    attempts: Mutex<VecDeque<ConnectionAttempt>>,
    health: Mutex<ConnectionHealth>,
    retry_policy: RetryPolicy,
    callbacks: ConnectionCallbacks,
}

impl Connection {
    pub fn new(
        camera_id: Uuid,
        protocol: ProtocolType,
        kind: ConnectionKind,
        handler: Box<dyn ProtocolHandler>,
        retry_policy: RetryPolicy,
        callbacks: ConnectionCallbacks,
    ) -> Self {
        Self {
            camera_id,
            protocol,
            kind,
            handler: tokio::sync::Mutex::new(handler),
            state: Mutex::new(ConnectionState::Disconnected),
            attempts: Mutex::new(VecDeque::with_capacity(MAX_ATTEMPT_HISTORY)),
            health: Mutex::new(ConnectionHealth::default()),
            retry_policy,
            callbacks,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, new: ConnectionState) {
        let old = {
            let mut guard = self.state.lock();
            let old = *guard;
            *guard = new;
            old
        };
        if old != new {
            info!(camera_id = %self.camera_id, protocol = %self.protocol, %old, %new, "connection state changed");
            if let Some(cb) = &self.callbacks.on_state_changed {
                cb(old, new);
            }
        }
    }

    /// Drive `connect()` through the handler, retrying up to `max_retries`
    /// times with `retry_delay` between attempts (§4.B). On exhaustion the
    /// connection ends in `Error` with the last attempt's cause recorded.
    pub async fn connect(&self) -> Result<()> {
        if matches!(self.state(), ConnectionState::Connected | ConnectionState::Streaming) {
            return Ok(());
        }
        self.set_state(ConnectionState::Connecting);

        let mut last_err: Option<CoreError> = None;
        for attempt_no in 0..=self.retry_policy.max_retries {
            let attempt_id = Uuid::new_v4();
            let start_time = Utc::now();
            let started = Instant::now();

            let result = self.handler.lock().await.connect().await;
            let response_time_ms = started.elapsed().as_millis() as u64;

            let success = result.is_ok();
            let error_string = result.as_ref().err().map(|e| e.to_string());
            self.record_attempt(ConnectionAttempt {
                attempt_id,
                protocol: self.protocol,
                kind: self.kind,
                start_time,
                end_time: Some(Utc::now()),
                success,
                error: error_string,
                response_time_ms: Some(response_time_ms),
            });

            match result {
                Ok(()) => {
                    self.set_state(ConnectionState::Connected);
                    return Ok(());
                }
                Err(e) => {
                    warn!(camera_id = %self.camera_id, attempt = attempt_no, error = %e, "connect attempt failed");
                    last_err = Some(e);
                    if attempt_no < self.retry_policy.max_retries {
                        sleep(self.retry_policy.retry_delay).await;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Error);
        Err(last_err.unwrap_or(CoreError::Unreachable("no attempts made".into())))
    }

    pub async fn disconnect(&self) {
        self.handler.lock().await.disconnect().await;
        self.set_state(ConnectionState::Disconnected);
    }

    pub async fn start_streaming(&self) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            return Err(CoreError::NotConnected);
        }
        self.handler.lock().await.start_streaming().await?;
        self.set_state(ConnectionState::Streaming);
        Ok(())
    }

    pub async fn stop_streaming(&self) -> Result<()> {
        self.handler.lock().await.stop_streaming().await?;
        if self.state() == ConnectionState::Streaming {
            self.set_state(ConnectionState::Connected);
        }
        Ok(())
    }

    pub async fn capture_snapshot(&self) -> Result<Option<bytes::Bytes>> {
        if !matches!(self.state(), ConnectionState::Connected | ConnectionState::Streaming) {
            return Err(CoreError::NotConnected);
        }
        self.handler.lock().await.capture_snapshot().await
    }

    /// Installs the sink the handler pushes frames into once
    /// `start_streaming` runs. Must be called before `start_streaming`;
    /// the orchestrator wires this to a [`crate::stream::pipeline::StreamPipeline`].
    pub async fn set_frame_sink(&self, sink: FrameSink) {
        self.handler.lock().await.set_frame_sink(sink);
    }

    /// PTZ move (§4.A vendor-HTTP action table). `ProtocolError` if the
    /// underlying handler doesn't implement [`crate::protocol::PtzControl`]
    /// (ONVIF PTZ is a tracked gap, not implemented).
    pub async fn ptz_move(&self, direction: PtzDirection, speed: u8) -> Result<bool> {
        let mut handler = self.handler.lock().await;
        let ptz = handler
            .as_ptz_control()
            .ok_or_else(|| CoreError::Protocol("handler does not support PTZ".into()))?;
        ptz.ptz_move(direction, speed).await
    }

    pub async fn ptz_stop(&self, direction: PtzDirection) -> Result<bool> {
        let mut handler = self.handler.lock().await;
        let ptz = handler
            .as_ptz_control()
            .ok_or_else(|| CoreError::Protocol("handler does not support PTZ".into()))?;
        ptz.ptz_stop(direction).await
    }

    pub async fn set_preset(&self, preset_id: u8) -> Result<bool> {
        let mut handler = self.handler.lock().await;
        let ptz = handler
            .as_ptz_control()
            .ok_or_else(|| CoreError::Protocol("handler does not support PTZ".into()))?;
        ptz.set_preset(preset_id).await
    }

    pub async fn goto_preset(&self, preset_id: u8) -> Result<bool> {
        let mut handler = self.handler.lock().await;
        let ptz = handler
            .as_ptz_control()
            .ok_or_else(|| CoreError::Protocol("handler does not support PTZ".into()))?;
        ptz.goto_preset(preset_id).await
    }

    /// One iteration of the health-check loop (§4.D drives the cadence).
    /// Three consecutive failures flip `alive=false` and move the
    /// connection to `Error`, firing `on_connection_lost`.
    pub async fn run_health_check(&self) {
        let ok = self.handler.lock().await.test_connection().await;
        let mut health = self.health.lock();
        if ok {
            let was_dead = !health.alive;
            health.alive = true;
            health.consecutive_failures = 0;
            health.last_successful_check = Some(Utc::now());
            drop(health);
            if was_dead {
                if let Some(cb) = &self.callbacks.on_connection_restored {
                    cb();
                }
            }
        } else {
            health.consecutive_failures += 1;
            let crossed = health.consecutive_failures == 3 && health.alive;
            if crossed {
                health.alive = false;
            }
            drop(health);
            if crossed {
                self.set_state(ConnectionState::Error);
                if let Some(cb) = &self.callbacks.on_connection_lost {
                    cb("three consecutive health-check failures");
                }
            }
        }
    }

    fn record_attempt(&self, attempt: ConnectionAttempt) {
        let mut attempts = self.attempts.lock();
        if attempts.len() >= MAX_ATTEMPT_HISTORY {
            attempts.pop_front();
        }
        attempts.push_back(attempt);
    }

    pub fn recent_attempts(&self, limit: usize) -> Vec<ConnectionAttempt> {
        let attempts = self.attempts.lock();
        attempts.iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            camera_id: self.camera_id,
            protocol: self.protocol,
            kind: self.kind,
            state: self.state(),
            health: self.health.lock().clone(),
            attempt_count: self.attempts.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Capabilities;
    use crate::protocol::FrameSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockHandler {
        connect_calls: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl ProtocolHandler for MockHandler {
        async fn connect(&mut self) -> Result<()> {
            let n = self.connect_calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(CoreError::Unreachable("mock unreachable".into()))
            } else {
                Ok(())
            }
        }
        async fn disconnect(&mut self) {}
        async fn test_connection(&mut self) -> bool {
            true
        }
        async fn capture_snapshot(&mut self) -> Result<Option<bytes::Bytes>> {
            Ok(Some(bytes::Bytes::from_static(b"\xff\xd8\xff\xd9")))
        }
        async fn start_streaming(&mut self) -> Result<()> {
            Ok(())
        }
        async fn stop_streaming(&mut self) -> Result<()> {
            Ok(())
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }
        fn set_frame_sink(&mut self, _sink: FrameSink) {}
    }

    fn conn(fail_times: u32, max_retries: u32) -> Connection {
        let handler = MockHandler { connect_calls: AtomicU32::new(0), fail_times };
        Connection::new(
            Uuid::new_v4(),
            ProtocolType::Rtsp,
            ConnectionKind::Stream,
            Box::new(handler),
            RetryPolicy { max_retries, retry_delay: Duration::from_millis(1) },
            ConnectionCallbacks::default(),
        )
    }

    #[tokio::test]
    async fn connect_success_transitions_to_connected() {
        let c = conn(0, 0);
        c.connect().await.unwrap();
        assert_eq!(c.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn retry_exhaustion_ends_in_error_with_three_attempts() {
        let c = conn(10, 2);
        let err = c.connect().await;
        assert!(err.is_err());
        assert_eq!(c.state(), ConnectionState::Error);
        assert_eq!(c.recent_attempts(10).len(), 3);
        assert!(c.recent_attempts(10).iter().all(|a| !a.success));
    }

    #[tokio::test]
    async fn snapshot_requires_connected_state() {
        let c = conn(0, 0);
        assert!(matches!(c.capture_snapshot().await, Err(CoreError::NotConnected)));
        c.connect().await.unwrap();
        let bytes = c.capture_snapshot().await.unwrap().unwrap();
        assert_eq!(&bytes[..], b"\xff\xd8\xff\xd9");
    }
}
