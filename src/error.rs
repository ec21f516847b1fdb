//! Error types shared across the orchestrator.
//!
//! Component-level failures (capture, restore) are aggregated into the run
//! report and never abort a run on their own; only structural failures
//! (missing tooling, archive write, declined confirmation) reach the exit
//! code.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DrError {
    #[error("required tool not found on PATH: {0}")]
    ToolingMissing(String),

    #[error("no {kind} matched selector '{selector}' in namespace '{namespace}'")]
    ResourceNotFound {
        kind: &'static str,
        selector: String,
        namespace: String,
    },

    #[error("capture failed for {component}: {reason}")]
    CaptureFailed { component: String, reason: String },

    #[error("restore failed for {component}: {reason}")]
    RestoreFailed { component: String, reason: String },

    #[error("archive operation failed: {0}")]
    ArchiveFailed(String),

    #[error("confirmation declined by operator")]
    ConfirmationDeclined,

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("run cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DrError>;

impl DrError {
    /// True for failures that must change the process exit code.
    /// Everything else is reported per component and the run continues.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            DrError::ToolingMissing(_)
                | DrError::ArchiveFailed(_)
                | DrError::Config(_)
                | DrError::Cancelled
        )
    }
}
