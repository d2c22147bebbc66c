//! Bounded part dispatch.
//!
//! The scheduler hands parts to the service on a [`JoinSet`], at most
//! `concurrency` at a time. A caller must hold a slot from
//! [`UploadScheduler::acquire_slot`] before it reads the next part, so the
//! reader can never run more than `concurrency` buffers ahead of the network.
//! Each task gives its slot back only after observing its own outcome.

use std::sync::Arc;

use glacierup_transfer::{Part, PartProgress, format_bytes, part_count};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{ServiceError, UploadError};
use crate::service::{ArchiveService, PartUpload};
use crate::types::{PartResult, SchedulerState, UploadEvent, UploadOptions, UploadSession};

/// Dispatches part uploads for one multipart session.
pub struct UploadScheduler {
    service: Arc<dyn ArchiveService>,
    part_size: u64,
    slots: Arc<Semaphore>,
    cancel: CancellationToken,
    tasks: JoinSet<PartResult>,
    progress: Arc<PartProgress>,
    session: Option<UploadSession>,
    state: SchedulerState,
    events_tx: Option<mpsc::Sender<UploadEvent>>,
}

impl UploadScheduler {
    /// Creates an idle scheduler.
    ///
    /// `options` are taken as given; validation is the caller's job.
    pub fn new(
        service: Arc<dyn ArchiveService>,
        options: &UploadOptions,
        cancel: CancellationToken,
    ) -> Self {
        let concurrency = options.concurrency.max(1);
        Self {
            service,
            part_size: options.part_size,
            slots: Arc::new(Semaphore::new(concurrency)),
            cancel,
            tasks: JoinSet::new(),
            progress: Arc::new(PartProgress::new(0)),
            session: None,
            state: SchedulerState::Idle,
            events_tx: None,
        }
    }

    /// Sends progress events to `events_tx`. Events are dropped when the
    /// channel is full.
    pub fn with_events(mut self, events_tx: mpsc::Sender<UploadEvent>) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn session(&self) -> Option<&UploadSession> {
        self.session.as_ref()
    }

    pub fn progress(&self) -> Arc<PartProgress> {
        Arc::clone(&self.progress)
    }

    /// Opens the multipart session.
    pub async fn initiate(
        &mut self,
        target_id: &str,
        description: &str,
        total_size: u64,
    ) -> Result<UploadSession, UploadError> {
        self.expect_state(&[SchedulerState::Idle], "idle")?;
        let total_parts = part_count(total_size, self.part_size)?;

        let session_id = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
            result = self.service.initiate_upload(target_id, description, self.part_size) => result,
        };
        let session_id = match session_id {
            Ok(id) => id,
            Err(e) => {
                self.state = SchedulerState::Failed;
                error!(target = %target_id, error = %e, "initiate upload failed");
                return Err(e.into());
            }
        };

        let session = UploadSession {
            target_id: target_id.to_string(),
            session_id,
            part_size: self.part_size,
            total_size,
            total_parts,
        };
        info!(
            target = %session.target_id,
            session = %session.session_id,
            total_size,
            total_parts = session.total_parts,
            "multipart upload initiated"
        );

        self.progress = Arc::new(PartProgress::new(session.total_parts));
        self.session = Some(session.clone());
        self.state = SchedulerState::Initiated;
        self.emit(UploadEvent::Initiated {
            session_id: session.session_id.clone(),
            total_parts: session.total_parts,
        });
        Ok(session)
    }

    /// Waits for a free upload slot.
    ///
    /// Returns [`UploadError::Cancelled`] once the upload has been cancelled,
    /// either by the caller or because a part failed.
    pub async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, UploadError> {
        self.expect_state(
            &[SchedulerState::Initiated, SchedulerState::Dispatching],
            "initiated or dispatching",
        )?;

        let slots = Arc::clone(&self.slots);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(UploadError::Cancelled),
            permit = slots.acquire_owned() => permit.map_err(|_| UploadError::Cancelled),
        }
    }

    /// Starts uploading `part`. The slot travels with the upload task and is
    /// released when that task finishes.
    pub fn dispatch(&mut self, part: Part, slot: OwnedSemaphorePermit) -> Result<(), UploadError> {
        self.expect_state(
            &[SchedulerState::Initiated, SchedulerState::Dispatching],
            "initiated or dispatching",
        )?;
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        let Some(session) = self.session.as_ref() else {
            return Err(UploadError::InvalidState {
                actual: self.state,
                expected: "initiated",
            });
        };

        let request = PartUpload::new(session, part);
        let dispatched = self.progress.record_dispatched();
        info!(
            part = request.index,
            range = %request.content_range(),
            size = %format_bytes(request.len()),
            "started {dispatched} of {} parts",
            self.progress.total_parts()
        );
        self.emit(UploadEvent::PartDispatched {
            index: request.index,
            dispatched,
        });

        let service = Arc::clone(&self.service);
        let cancel = self.cancel.clone();
        let progress = Arc::clone(&self.progress);
        let events_tx = self.events_tx.clone();

        self.tasks.spawn(async move {
            let index = request.index;
            let byte_start = request.byte_start;
            let byte_end = request.byte_end;
            let len = request.len();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ServiceError::Cancelled),
                result = service.upload_part(request) => result,
            };

            let total_parts = progress.total_parts();
            let (completed, cancelled) = match &outcome {
                Ok(_) => {
                    let completed = progress.record_completed(len);
                    let snap = progress.snapshot();
                    info!(
                        part = index,
                        uploaded = %format_bytes(snap.bytes_completed),
                        rate = %format!("{}/s", format_bytes(snap.bytes_per_second() as u64)),
                        "{completed} of {total_parts} parts completed ({:.0}%)",
                        snap.fraction() * 100.0
                    );
                    (completed, false)
                }
                Err(ServiceError::Cancelled) => {
                    debug!(part = index, "part upload cancelled");
                    (progress.record_failed(), true)
                }
                Err(e) => {
                    error!(part = index, error = %e, "part upload failed");
                    // Stop further dispatch and abandon sibling requests.
                    cancel.cancel();
                    (progress.record_failed(), false)
                }
            };

            let (ack, error) = match outcome {
                Ok(ack) => (Some(ack), None),
                Err(e) => (None, Some(e)),
            };
            let result = PartResult {
                index,
                byte_start,
                byte_end,
                success: ack.is_some(),
                ack,
                error,
            };

            if let Some(tx) = events_tx {
                let _ = tx.try_send(UploadEvent::PartCompleted {
                    index,
                    success: result.success,
                    cancelled,
                    completed,
                    total_parts,
                });
            }
            drop(slot);
            result
        });

        self.state = SchedulerState::Dispatching;
        Ok(())
    }

    /// Waits for every dispatched part and returns the results sorted by
    /// index.
    ///
    /// The first real failure cancels the remaining requests and is returned;
    /// parts that were merely cancelled as a consequence are not reported as
    /// the cause.
    pub async fn await_all(&mut self) -> Result<Vec<PartResult>, UploadError> {
        self.expect_state(
            &[SchedulerState::Initiated, SchedulerState::Dispatching],
            "initiated or dispatching",
        )?;
        self.state = SchedulerState::Draining;

        let mut results = Vec::with_capacity(self.tasks.len());
        let mut failure: Option<UploadError> = None;
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(result) => {
                    match &result.error {
                        Some(ServiceError::Cancelled) | None => {}
                        Some(e) => {
                            if failure.is_none() {
                                self.cancel.cancel();
                                failure = Some(UploadError::PartFailed {
                                    index: result.index,
                                    source: e.clone(),
                                });
                            }
                        }
                    }
                    results.push(result);
                }
                Err(e) => {
                    self.cancel.cancel();
                    failure.get_or_insert(UploadError::Task(e.to_string()));
                }
            }
        }
        results.sort_by_key(|r| r.index);

        if let Some(err) = failure {
            self.state = SchedulerState::Failed;
            return Err(err);
        }
        if results.iter().any(|r| !r.success) {
            self.state = SchedulerState::Failed;
            return Err(UploadError::Cancelled);
        }

        self.state = SchedulerState::Completed;
        Ok(results)
    }

    /// Cancels the upload and aborts every in-flight request without waiting.
    ///
    /// The remote session is left as is.
    pub fn abort(&mut self) {
        self.cancel.cancel();
        self.tasks.abort_all();
        self.state = SchedulerState::Failed;
    }

    fn expect_state(
        &self,
        allowed: &[SchedulerState],
        expected: &'static str,
    ) -> Result<(), UploadError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(UploadError::InvalidState {
                actual: self.state,
                expected,
            })
        }
    }

    fn emit(&self, event: UploadEvent) {
        if let Some(tx) = &self.events_tx {
            let _ = tx.try_send(event);
        }
    }
}
