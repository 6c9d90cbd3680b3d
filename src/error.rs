//! Error classification for batch synchronization
//!
//! Only job-level failures are recovered in place (they become a failed
//! [`crate::job::JobResult`] at the runner boundary). Every other kind
//! aborts the batch and reaches the caller.

use thiserror::Error;

/// Batch-level error kinds.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid option combination or malformed arguments. No jobs are
    /// dispatched when this is raised.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A named table is missing on one side, or a side is unreachable,
    /// discovered before dispatch.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Transaction failure discovered at commit time of the consistency
    /// envelope. Surfaces even when every individual job reported success.
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// Terminal aggregate error when one or more tables failed to sync.
    #[error("{count} table(s) failed to sync: {}", .tables.join(", "))]
    Batch { tables: Vec<String>, count: usize },
}

impl SyncError {
    /// Process exit code for this error kind. Usage-class errors exit with
    /// 2, runtime failures with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Configuration(_) | SyncError::Precondition(_) => 2,
            SyncError::Consistency(_) | SyncError::Batch { .. } => 1,
        }
    }
}
