// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Protocol Handlers (§4.A): a uniform async contract implemented by ONVIF,
//! RTSP, and vendor-HTTP/CGI backends.

pub mod digest;
pub mod onvif;
pub mod rtsp;
pub mod vendor_http;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::camera::Capabilities;
use crate::error::Result;

/// Non-blocking sink a handler pushes frames into while streaming. The
/// handler MUST tolerate the sink dropping frames under back-pressure;
/// `Fn` rather than `FnMut` so it can be cloned into callback closures.
pub type FrameSink = Arc<dyn Fn(Bytes) + Send + Sync>;

/// The uniform contract every protocol backend implements (§4.A table).
/// State transitions are the caller's responsibility (`connection::model`
/// drives them); the handler itself only reports success/failure.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// Establish a session. Implementations MUST refuse with
    /// [`crate::error::CoreError::Auth`] when credentials are required but
    /// missing, unless the handler explicitly allows anonymous access.
    async fn connect(&mut self) -> Result<()>;

    /// Tear down the session. Never fails observably; handlers log and
    /// swallow teardown errors.
    async fn disconnect(&mut self);

    /// Probe reachability without leaving a persistent session.
    async fn test_connection(&mut self) -> bool;

    /// Capture one still image (JPEG by convention).
    async fn capture_snapshot(&mut self) -> Result<Option<Bytes>>;

    /// Begin producing frames into the sink set via [`ProtocolHandler::set_frame_sink`].
    async fn start_streaming(&mut self) -> Result<()>;

    /// Stop producing frames; the session itself remains connected.
    async fn stop_streaming(&mut self) -> Result<()>;

    /// Static capability descriptor — does not require a live connection.
    fn capabilities(&self) -> Capabilities;

    /// Install the frame sink used once streaming starts.
    fn set_frame_sink(&mut self, sink: FrameSink);

    /// Borrow this handler as a [`PtzControl`] implementor, if it is one.
    /// Only the vendor-HTTP/CGI family answers `Some` today; ONVIF PTZ
    /// (ContinuousMove) is tracked as a gap, not implemented here.
    fn as_ptz_control(&mut self) -> Option<&mut dyn PtzControl> {
        None
    }
}

/// PTZ actions supported by handlers that implement [`PtzControl`]
/// (currently only the vendor-HTTP/CGI family, §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtzDirection {
    Up,
    Down,
    Left,
    Right,
    ZoomIn,
    ZoomOut,
}

#[async_trait]
pub trait PtzControl: Send + Sync {
    async fn ptz_move(&mut self, direction: PtzDirection, speed: u8) -> Result<bool>;
    async fn ptz_stop(&mut self, direction: PtzDirection) -> Result<bool>;
    async fn set_preset(&mut self, preset_id: u8) -> Result<bool>;
    async fn goto_preset(&mut self, preset_id: u8) -> Result<bool>;
}
