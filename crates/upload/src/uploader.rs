//! Upload orchestrator: one file in, one archive out.
//!
//! Drives the scheduler and verifier, forwards progress events, and supports
//! cancellation from the caller.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glacierup_transfer::{Part, PartReader, TransferError, format_bytes};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::UploadError;
use crate::scheduler::UploadScheduler;
use crate::service::ArchiveService;
use crate::types::{UploadEvent, UploadOptions, UploadOutcome};
use crate::verifier::IntegrityVerifier;

/// Uploads files to an archive service.
pub struct ArchiveUploader {
    service: Arc<dyn ArchiveService>,
    options: UploadOptions,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl ArchiveUploader {
    /// Creates an uploader.
    pub fn new(service: Arc<dyn ArchiveService>, options: UploadOptions) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            service,
            options,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns the cancellation token shared by every upload of this uploader.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Uploads `path` into `target_id`.
    ///
    /// Read and service failures abort the upload; a checksum mismatch does
    /// not, and is reported through [`UploadOutcome::checksum_matched`].
    pub async fn upload_file(
        &self,
        path: &Path,
        target_id: &str,
        description: &str,
    ) -> Result<UploadOutcome, UploadError> {
        match self.run(path, target_id, description).await {
            Ok(outcome) => {
                self.emit(UploadEvent::Completed {
                    checksum_matched: outcome.checksum_matched,
                });
                Ok(outcome)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "upload failed");
                self.emit(UploadEvent::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        path: &Path,
        target_id: &str,
        description: &str,
    ) -> Result<UploadOutcome, UploadError> {
        self.options.validate()?;
        self.check_cancelled()?;

        let mut reader = open_reader(path.to_path_buf(), self.options.part_size).await?;
        let total_size = reader.total_size();
        if total_size == 0 {
            return Err(UploadError::EmptySource(path.display().to_string()));
        }
        info!(
            path = %path.display(),
            total_size,
            part_size = self.options.part_size,
            concurrency = self.options.concurrency,
            "preparing to upload {}",
            format_bytes(total_size)
        );

        let mut scheduler = UploadScheduler::new(
            Arc::clone(&self.service),
            &self.options,
            self.cancel.child_token(),
        )
        .with_events(self.events_tx.clone());
        let session = scheduler
            .initiate(target_id, description, total_size)
            .await?;

        loop {
            let slot = match scheduler.acquire_slot().await {
                Ok(slot) => slot,
                // A part failed or the caller cancelled; await_all says which.
                Err(UploadError::Cancelled) => break,
                Err(e) => return Err(e),
            };

            let (returned, next) = read_next(reader).await?;
            reader = returned;
            let part = match next {
                Ok(Some(part)) => part,
                Ok(None) => break,
                Err(e) => {
                    scheduler.abort();
                    return Err(e.into());
                }
            };

            let is_last = part.is_last;
            match scheduler.dispatch(part, slot) {
                Ok(()) => {}
                Err(UploadError::Cancelled) => break,
                Err(e) => return Err(e),
            }
            if is_last {
                break;
            }
        }

        let results = scheduler.await_all().await?;
        info!(
            session = %session.session_id,
            parts = results.len(),
            "all parts uploaded"
        );

        self.check_cancelled()?;
        self.emit(UploadEvent::Verifying);
        let verification = IntegrityVerifier::new(Arc::clone(&self.service))
            .verify(path, &session)
            .await?;

        info!(
            archive = %verification.archive.archive_id,
            location = %verification.archive.location,
            matched = verification.matched,
            "upload completed"
        );

        Ok(UploadOutcome {
            archive_id: verification.archive.archive_id,
            location: verification.archive.location,
            checksum_matched: verification.matched,
            local_checksum: verification.local_hash,
            server_checksum: verification.server_hash,
            total_size,
            total_parts: session.total_parts,
        })
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        Ok(())
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events_tx.try_send(event);
    }
}

/// Uploads `path` with a one-off [`ArchiveUploader`].
pub async fn upload_file(
    service: Arc<dyn ArchiveService>,
    path: &Path,
    target_id: &str,
    description: &str,
    options: UploadOptions,
) -> Result<UploadOutcome, UploadError> {
    ArchiveUploader::new(service, options)
        .upload_file(path, target_id, description)
        .await
}

async fn open_reader(path: PathBuf, part_size: u64) -> Result<PartReader<File>, UploadError> {
    tokio::task::spawn_blocking(move || PartReader::open(&path, part_size))
        .await
        .map_err(|e| UploadError::Task(format!("open task failed: {e}")))?
        .map_err(UploadError::from)
}

type ReadResult = (PartReader<File>, Result<Option<Part>, TransferError>);

/// Reads and hashes the next part on the blocking pool, handing the reader
/// back afterwards.
async fn read_next(mut reader: PartReader<File>) -> Result<ReadResult, UploadError> {
    tokio::task::spawn_blocking(move || {
        let next = reader.next_part();
        (reader, next)
    })
    .await
    .map_err(|e| UploadError::Task(format!("read task failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::testing::MockVault;
    use glacierup_transfer::hash_file;
    use std::time::Duration;

    const MIB: usize = 1024 * 1024;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn options(concurrency: usize) -> UploadOptions {
        UploadOptions {
            part_size: MIB as u64,
            concurrency,
        }
    }

    fn write_file(dir: &Path, len: usize) -> PathBuf {
        let path = dir.join("archive.bin");
        std::fs::write(&path, pattern(len)).unwrap();
        path
    }

    #[tokio::test]
    async fn uploads_and_verifies_file() {
        let dir = tempfile::tempdir().unwrap();
        // 2 MiB + 32 KiB: parts of 1 MiB, 1 MiB, 32 KiB.
        let path = write_file(dir.path(), 2 * MIB + 32 * 1024);

        let vault = Arc::new(MockVault::new().with_part_delay(Duration::from_millis(2)));
        let mut uploader = ArchiveUploader::new(vault.clone(), options(10));
        let mut events_rx = uploader.take_events().unwrap();

        let outcome = uploader
            .upload_file(&path, "photos", "holiday 2026")
            .await
            .unwrap();

        assert!(outcome.checksum_matched);
        assert_eq!(outcome.total_parts, 3);
        assert_eq!(outcome.total_size, (2 * MIB + 32 * 1024) as u64);
        assert_eq!(outcome.archive_id, "archive-session-1");
        assert_eq!(outcome.local_checksum, hash_file(&path).unwrap());
        assert_eq!(outcome.server_checksum, outcome.local_checksum);
        assert_eq!(vault.arrival_order(), vec![0, 1, 2]);

        drop(uploader);
        let mut events = Vec::new();
        while let Some(e) = events_rx.recv().await {
            events.push(e);
        }
        assert!(matches!(events.first(), Some(UploadEvent::Initiated { total_parts: 3, .. })));
        assert_eq!(
            events.last(),
            Some(&UploadEvent::Completed {
                checksum_matched: true
            })
        );
        let completed = events
            .iter()
            .filter(|e| matches!(e, UploadEvent::PartCompleted { success: true, .. }))
            .count();
        assert_eq!(completed, 3);
        let verifying = events.iter().position(|e| *e == UploadEvent::Verifying).unwrap();
        let last_part = events
            .iter()
            .rposition(|e| matches!(e, UploadEvent::PartCompleted { .. }))
            .unwrap();
        assert!(last_part < verifying);
    }

    #[tokio::test]
    async fn exact_multiple_uploads_one_part() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), MIB);

        let vault = Arc::new(MockVault::new());
        let outcome = upload_file(vault.clone(), &path, "vault", "one part", options(10))
            .await
            .unwrap();
        assert_eq!(outcome.total_parts, 1);
        assert_eq!(vault.stored_parts(), 1);
        assert!(outcome.checksum_matched);
    }

    #[tokio::test]
    async fn repeated_hash_matches_server() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 3 * MIB + 1);
        let first = hash_file(&path).unwrap();
        let second = hash_file(&path).unwrap();
        assert_eq!(first, second);

        let vault = Arc::new(MockVault::new());
        let outcome = upload_file(vault, &path, "vault", "d", options(2))
            .await
            .unwrap();
        assert_eq!(outcome.server_checksum, first);
    }

    #[tokio::test]
    async fn transit_corruption_reports_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 2 * MIB + 7);

        let vault = Arc::new(MockVault::new().corrupting_part(1));
        let outcome = upload_file(vault, &path, "vault", "d", options(4))
            .await
            .unwrap();
        // Non-fatal: the archive exists, but integrity is not confirmed.
        assert!(!outcome.checksum_matched);
        assert_ne!(outcome.local_checksum, outcome.server_checksum);
        assert!(!outcome.archive_id.is_empty());
    }

    #[tokio::test]
    async fn part_failure_fails_upload_without_completing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 4 * MIB);

        let vault = Arc::new(MockVault::new().failing_part(2));
        let mut uploader = ArchiveUploader::new(vault.clone(), options(2));
        let mut events_rx = uploader.take_events().unwrap();

        let err = uploader.upload_file(&path, "vault", "d").await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::PartFailed {
                index: 2,
                source: ServiceError::Rejected { .. }
            }
        ));
        assert!(vault.completed().is_none());

        drop(uploader);
        let mut saw_failed = false;
        while let Some(e) = events_rx.recv().await {
            if matches!(e, UploadEvent::Failed { .. }) {
                saw_failed = true;
            }
        }
        assert!(saw_failed);
    }

    #[tokio::test]
    async fn initiate_failure_is_service_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 10);

        let vault = Arc::new(MockVault::new().failing_initiate());
        let err = upload_file(vault, &path, "vault", "d", options(2))
            .await
            .unwrap_err();
        assert!(err.is_service());
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(MockVault::new());
        let err = upload_file(
            vault.clone(),
            &dir.path().join("missing.bin"),
            "vault",
            "d",
            options(2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UploadError::Io(_)));
        assert_eq!(vault.sessions(), 0);
    }

    #[tokio::test]
    async fn read_failure_mid_upload_aborts_without_completing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 4 * MIB);

        // Part 0 takes 300 ms; with one slot the reader waits for it before
        // reading part 1.
        let vault = Arc::new(MockVault::new().with_part_delay(Duration::from_millis(100)));
        let mut uploader = ArchiveUploader::new(vault.clone(), options(1));
        let mut events_rx = uploader.take_events().unwrap();

        let truncate = {
            let path = path.clone();
            let vault = vault.clone();
            tokio::spawn(async move {
                while vault.arrival_order().is_empty() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                tokio::time::sleep(Duration::from_millis(30)).await;
                let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
                file.set_len((MIB + 10) as u64).unwrap();
            })
        };

        let err = uploader
            .upload_file(&path, "vault", "d")
            .await
            .unwrap_err();
        truncate.await.unwrap();

        match &err {
            UploadError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(vault.sessions(), 1);
        assert!(vault.completed().is_none());
        assert!(vault.stored_parts() <= 1);

        drop(uploader);
        let mut events = Vec::new();
        while let Some(e) = events_rx.recv().await {
            events.push(e);
        }
        assert!(matches!(events.last(), Some(UploadEvent::Failed { .. })));
        assert!(!events.contains(&UploadEvent::Verifying));
    }

    #[tokio::test]
    async fn empty_file_is_rejected_before_initiating() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 0);

        let vault = Arc::new(MockVault::new());
        let err = upload_file(vault.clone(), &path, "vault", "d", options(2))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::EmptySource(_)));
        assert_eq!(vault.sessions(), 0);
    }

    #[tokio::test]
    async fn invalid_options_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 10);

        let vault = Arc::new(MockVault::new());
        let bad = UploadOptions {
            part_size: 1000,
            concurrency: 2,
        };
        let err = upload_file(vault.clone(), &path, "vault", "d", bad)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transfer(TransferError::InvalidPartSize(1000))));
        assert_eq!(vault.sessions(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 10);

        let vault = Arc::new(MockVault::new());
        let uploader = ArchiveUploader::new(vault.clone(), options(2));
        uploader.cancel_token().cancel();

        let err = uploader.upload_file(&path, "vault", "d").await.unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));
        assert_eq!(vault.sessions(), 0);
    }

    #[tokio::test]
    async fn respects_concurrency_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), 6 * MIB);

        let vault = Arc::new(MockVault::new().with_part_delay(Duration::from_millis(5)));
        let outcome = upload_file(vault.clone(), &path, "vault", "d", options(2))
            .await
            .unwrap();
        assert_eq!(outcome.total_parts, 6);
        assert!(vault.max_in_flight() <= 2);
    }

    #[tokio::test]
    async fn take_events_once() {
        let mut uploader = ArchiveUploader::new(Arc::new(MockVault::new()), options(2));
        assert!(uploader.take_events().is_some());
        assert!(uploader.take_events().is_none());
    }
}
