// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Connection Model (§4.B) and Connection Orchestrator (§4.D).

pub mod model;
pub mod orchestrator;

pub use model::{Connection, ConnectionKind, ConnectionState, ConnectionStats};
pub use orchestrator::{BatchOperation, ConnectionOrchestrator, OrchestratorConfig, OrchestratorMetrics};
