// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

/// Error kinds surfaced by the protocol/connection/scan/persistence layers.
///
/// Handler-level failures are captured into the owning connection's attempt
/// record; batch and scan operations never let an individual failure here
/// propagate out of the batch — see `connection::orchestrator` and `scan::engine`.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("Auth error: {0}")]
    Auth(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not connected")]
    NotConnected,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("camera '{id}' not found")]
    CameraNotFound { id: String },
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(e: toml::de::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CoreError::Timeout(std::time::Duration::from_secs(0))
        } else if e.is_connect() {
            CoreError::Unreachable(e.to_string())
        } else {
            CoreError::Protocol(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
