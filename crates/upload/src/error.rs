//! Upload error types.

use glacierup_transfer::TransferError;

use crate::types::SchedulerState;

/// Failure of a single call to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("service rejected request ({status}): {code}: {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("request cancelled")]
    Cancelled,
}

/// Errors produced by the upload pipeline.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-I/O chunking failures. I/O errors from the reader are reported as
    /// [`UploadError::Io`].
    #[error("transfer error: {0}")]
    Transfer(TransferError),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("part {index} failed: {source}")]
    PartFailed {
        index: u32,
        #[source]
        source: ServiceError,
    },

    #[error("invalid upload options: {0}")]
    InvalidOptions(String),

    #[error("nothing to upload: {0} is empty")]
    EmptySource(String),

    #[error("scheduler is {actual:?}, expected {expected}")]
    InvalidState {
        actual: SchedulerState,
        expected: &'static str,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("task error: {0}")]
    Task(String),
}

impl From<TransferError> for UploadError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Io(e) => Self::Io(e),
            other => Self::Transfer(other),
        }
    }
}

impl UploadError {
    /// Returns `true` for errors raised by the remote service.
    pub fn is_service(&self) -> bool {
        matches!(self, Self::Service(_) | Self::PartFailed { .. })
    }
}
