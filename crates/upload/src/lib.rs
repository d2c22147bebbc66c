//! Multipart archive upload pipeline.
//!
//! This crate drives one file into a remote vault through the
//! [`ArchiveService`] seam. It has no transport dependency: the HTTP client
//! lives in `glacierup-vault-client`, and tests use an in-memory vault.
//!
//! # Pipeline
//!
//! 1. **Initiate**: open a multipart session
//! 2. **Dispatch**: read parts in byte order, one concurrency slot per part
//! 3. **Drain**: wait for every part, aborting on the first failure
//! 4. **Verify**: re-hash the whole file and complete the session

pub mod error;
pub mod scheduler;
pub mod service;
pub mod types;
pub mod uploader;
pub mod verifier;

#[cfg(test)]
mod testing;

pub use error::{ServiceError, UploadError};
pub use scheduler::UploadScheduler;
pub use service::{ArchiveService, PartUpload, ServiceFuture};
pub use types::{
    CompletedArchive, DEFAULT_CONCURRENCY, MAX_CONCURRENCY, PartAck, PartResult, SchedulerState,
    UploadEvent, UploadOptions, UploadOutcome, UploadSession, Verification,
};
pub use uploader::{ArchiveUploader, upload_file};
pub use verifier::{IntegrityVerifier, checksums_match};
