// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Stream Pipeline (§4.C): per-connection ring buffer, subscriber fan-out,
//! and the sliding-window metrics loop.

pub mod pipeline;

pub use pipeline::{StreamHandle, StreamMetricsSnapshot, StreamPipeline, StreamStatus};
