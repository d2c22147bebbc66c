//! Whole-file integrity check at completion time.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glacierup_transfer::{TREE_HASH_BLOCK_SIZE, hash_stream};
use tracing::{info, warn};

use crate::error::UploadError;
use crate::service::ArchiveService;
use crate::types::{UploadSession, Verification};

/// Case-insensitive hex comparison. An empty server checksum never matches.
pub fn checksums_match(local: &str, server: &str) -> bool {
    !server.is_empty() && local.eq_ignore_ascii_case(server)
}

/// Completes a session and checks the service's checksum against a fresh
/// local tree hash of the whole file.
pub struct IntegrityVerifier {
    service: Arc<dyn ArchiveService>,
}

impl IntegrityVerifier {
    pub fn new(service: Arc<dyn ArchiveService>) -> Self {
        Self { service }
    }

    /// Re-reads `path` in a second full pass, completes `session` with the
    /// resulting hash and compares it with the checksum the service reports.
    ///
    /// A mismatch is not an error: the archive exists remotely and the result
    /// carries `matched = false`.
    pub async fn verify(
        &self,
        path: &Path,
        session: &UploadSession,
    ) -> Result<Verification, UploadError> {
        let local_hash = local_tree_hash(path.to_path_buf(), session.total_size).await?;
        info!(session = %session.session_id, checksum = %local_hash, "computed checksum");

        let archive = self
            .service
            .complete_upload(
                &session.target_id,
                &session.session_id,
                session.total_size,
                &local_hash,
            )
            .await?;

        let server_hash = archive.checksum.clone().unwrap_or_default();
        let matched = checksums_match(&local_hash, &server_hash);
        if matched {
            info!(archive = %archive.archive_id, checksum = %server_hash, "checksums match");
        } else {
            warn!(
                archive = %archive.archive_id,
                local = %local_hash,
                server = %server_hash,
                "checksums do not match: archive integrity could not be confirmed"
            );
        }

        Ok(Verification {
            local_hash,
            server_hash,
            matched,
            archive,
        })
    }
}

async fn local_tree_hash(path: PathBuf, expected_size: u64) -> Result<String, UploadError> {
    tokio::task::spawn_blocking(move || -> Result<String, UploadError> {
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        if size != expected_size {
            return Err(UploadError::Io(io::Error::other(format!(
                "{} changed size during upload: {expected_size} -> {size} bytes",
                path.display()
            ))));
        }
        Ok(hash_stream(BufReader::with_capacity(
            TREE_HASH_BLOCK_SIZE,
            file,
        ))?)
    })
    .await
    .map_err(|e| UploadError::Task(format!("hash task failed: {e}")))?
}
