use thiserror::Error;

// ---------------------------------------------------------------------------
// ExecError — the task-level error taxonomy
// ---------------------------------------------------------------------------

/// Errors crossing the task execution boundary.
///
/// `Cancelled` and `Merged` are control-flow outcomes rather than failures:
/// the task run loop reports the former as a non-fatal
/// failed-on-cancellation and swallows the latter silently (the master task
/// finishes the merged slave on its behalf). Everything else is a genuine
/// failure and triggers the graph-wide cancellation cascade.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The cancel event fired and a cooperative check observed it.
    #[error("execution cancelled")]
    Cancelled,

    /// The task was absorbed by a master task during preparation.
    #[error("task merged into a master")]
    Merged,

    /// Rejected bind / seq-bind: type mismatch, self-loop, duplicate.
    #[error("binding rejected: {0}")]
    Binding(String),

    /// Operation on an expired (deleted) port sentinel.
    #[error("port expired: {0}")]
    PortExpired(String),

    /// A module's process hook failed.
    #[error("module failure: {0}")]
    ModuleFailure(String),

    /// Start requested while a cancellation is in progress.
    #[error("scheduling rejected: {0}")]
    Scheduling(String),

    /// Module or logger name registration conflict.
    #[error("name rejected: {0}")]
    Registry(String),

    /// Payload type does not match the declared port type.
    #[error("data format mismatch: {0}")]
    DataFormat(String),

    /// Port-protocol misuse (reading an uncaught port, double release, ...).
    /// These are programmer bugs surfaced as errors instead of aborts.
    #[error("port protocol violation: {0}")]
    Protocol(String),
}

impl From<anyhow::Error> for ExecError {
    fn from(e: anyhow::Error) -> Self {
        ExecError::ModuleFailure(format!("{e:#}"))
    }
}

impl ExecError {
    /// True for the two non-failure control-flow outcomes.
    pub fn is_benign(&self) -> bool {
        matches!(self, ExecError::Cancelled | ExecError::Merged)
    }
}

pub type ExecResult<T> = Result<T, ExecError>;
