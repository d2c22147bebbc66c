//! Remote archive service seam.
//!
//! `ArchiveService` is implemented by the HTTP vault client. Keeping the
//! pipeline behind a trait leaves it transport-free and testable with an
//! in-memory vault.

use std::future::Future;
use std::pin::Pin;

use glacierup_transfer::Part;

use crate::error::ServiceError;
use crate::types::{CompletedArchive, PartAck, UploadSession};

/// Boxed future returned by [`ArchiveService`] calls.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

/// One part upload request.
#[derive(Debug, Clone)]
pub struct PartUpload {
    pub target_id: String,
    pub session_id: String,
    pub index: u32,
    pub byte_start: u64,
    /// Inclusive.
    pub byte_end: u64,
    /// Hex tree hash of `data`.
    pub tree_hash: String,
    pub data: Vec<u8>,
}

impl PartUpload {
    /// Builds a request for `part`, taking ownership of its buffer.
    pub fn new(session: &UploadSession, part: Part) -> Self {
        Self {
            target_id: session.target_id.clone(),
            session_id: session.session_id.clone(),
            index: part.index,
            byte_start: part.byte_start,
            byte_end: part.byte_end,
            tree_hash: part.hash,
            data: part.data,
        }
    }

    /// Range header value, e.g. `bytes 0-1048575/*`.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/*", self.byte_start, self.byte_end)
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Abstract connection to an already-authenticated archive service.
pub trait ArchiveService: Send + Sync {
    /// Opens a multipart session and returns its id.
    fn initiate_upload<'a>(
        &'a self,
        target_id: &'a str,
        description: &'a str,
        part_size: u64,
    ) -> ServiceFuture<'a, String>;

    /// Uploads one part. Dropping the future abandons the request.
    fn upload_part(&self, part: PartUpload) -> ServiceFuture<'_, PartAck>;

    /// Completes the session; the service assembles the archive and reports
    /// its own tree hash.
    fn complete_upload<'a>(
        &'a self,
        target_id: &'a str,
        session_id: &'a str,
        total_size: u64,
        tree_hash: &'a str,
    ) -> ServiceFuture<'a, CompletedArchive>;
}
