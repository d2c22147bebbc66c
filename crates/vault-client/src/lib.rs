//! HTTP client for the vault multipart upload API.
//!
//! [`VaultClient`] implements [`glacierup_upload::ArchiveService`] on top of
//! `reqwest`. Requests go to an already-authenticated endpoint; an optional
//! bearer token is attached to every request.

pub mod client;
pub mod types;

pub use client::{ClientConfig, Error, VaultClient, archive_description};
pub use types::ErrorBody;

/// API version sent with every request.
pub const GLACIER_API_VERSION: &str = "2012-06-01";
