//! Data types for the upload pipeline.

use glacierup_transfer::{DEFAULT_PART_SIZE, validate_part_size};
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, UploadError};

/// Default number of concurrent part uploads.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Upper bound accepted for [`UploadOptions::concurrency`].
pub const MAX_CONCURRENCY: usize = 64;

/// Tunables for one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    /// Fixed part size; a power of two between 1 MiB and 4 GiB.
    pub part_size: u64,
    /// Maximum number of part uploads in flight.
    pub concurrency: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl UploadOptions {
    /// Checks the options against the service limits.
    pub fn validate(&self) -> Result<(), UploadError> {
        validate_part_size(self.part_size)?;
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(UploadError::InvalidOptions(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}, got {}",
                self.concurrency
            )));
        }
        Ok(())
    }
}

/// A multipart session opened on the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    /// Vault the archive lands in.
    pub target_id: String,
    /// Service-assigned upload id.
    pub session_id: String,
    pub part_size: u64,
    pub total_size: u64,
    pub total_parts: u32,
}

/// Service acknowledgement of one uploaded part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartAck {
    /// Tree hash the service computed for the part, if it reported one.
    pub checksum: Option<String>,
}

/// Response to completing a multipart session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedArchive {
    pub archive_id: String,
    pub location: String,
    /// Tree hash of the assembled archive as computed by the service.
    pub checksum: Option<String>,
}

/// Outcome of one dispatched part.
#[derive(Debug, Clone)]
pub struct PartResult {
    pub index: u32,
    pub byte_start: u64,
    pub byte_end: u64,
    pub success: bool,
    pub ack: Option<PartAck>,
    pub error: Option<ServiceError>,
}

/// Local vs. service checksum comparison.
#[derive(Debug, Clone)]
pub struct Verification {
    pub local_hash: String,
    pub server_hash: String,
    pub matched: bool,
    pub archive: CompletedArchive,
}

/// Final result of an upload.
///
/// `checksum_matched == false` means the archive exists remotely but its
/// integrity could not be confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub archive_id: String,
    pub location: String,
    pub checksum_matched: bool,
    pub local_checksum: String,
    pub server_checksum: String,
    pub total_size: u64,
    pub total_parts: u32,
}

/// Scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Initiated,
    Dispatching,
    Draining,
    Completed,
    Failed,
}

/// Progress event emitted during an upload.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// Session opened.
    Initiated {
        session_id: String,
        total_parts: u32,
    },
    /// A part was handed to the service.
    PartDispatched { index: u32, dispatched: u32 },
    /// A part finished, successfully or not. `cancelled` marks parts that
    /// were stopped because the upload was aborted.
    PartCompleted {
        index: u32,
        success: bool,
        cancelled: bool,
        completed: u32,
        total_parts: u32,
    },
    /// All parts are in; the whole-file hash is being computed.
    Verifying,
    /// Session completed.
    Completed { checksum_matched: bool },
    /// Upload aborted.
    Failed { error: String },
}
