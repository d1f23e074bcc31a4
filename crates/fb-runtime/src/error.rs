use derive_more::From;
use fb_core::error::ExecError;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum RuntimeReason {
    #[error("bootstrap error")]
    Bootstrap,
    #[error("shutdown error")]
    Shutdown,
    #[error("execution cancelled")]
    Cancelled,
    #[error("module failure")]
    ModuleFailure,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for RuntimeReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Bootstrap => 2001,
            Self::Shutdown => 2002,
            Self::Cancelled => 2003,
            Self::ModuleFailure => 2004,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

impl RuntimeReason {
    /// Map the outcome of a drained graph to the boundary reason.
    pub fn from_exec(e: &ExecError) -> Self {
        match e {
            ExecError::Cancelled => RuntimeReason::Cancelled,
            _ => RuntimeReason::ModuleFailure,
        }
    }
}

pub type RuntimeError = StructError<RuntimeReason>;
pub type RuntimeResult<T> = Result<T, RuntimeError>;
