//! In-memory vault used by the pipeline tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use glacierup_transfer::hash_part;

use crate::error::ServiceError;
use crate::service::{ArchiveService, PartUpload, ServiceFuture};
use crate::types::{CompletedArchive, PartAck};

#[derive(Default)]
struct VaultState {
    sessions: u32,
    /// byte_start -> data
    parts: BTreeMap<u64, Vec<u8>>,
    arrival_order: Vec<u32>,
    completed: Option<(u64, String)>,
}

/// Assembles parts by byte range and reports the tree hash of what it
/// received on completion.
#[derive(Default)]
pub(crate) struct MockVault {
    state: Mutex<VaultState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    abandoned: AtomicUsize,
    part_delay: Duration,
    slow_part: Option<(u32, Duration)>,
    failing_parts: HashSet<u32>,
    corrupt_part: Option<u32>,
    fail_initiate: bool,
    fail_complete: bool,
    server_checksum: Option<Option<String>>,
}

struct InFlightGuard<'a> {
    vault: &'a MockVault,
    finished: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.vault.in_flight.fetch_sub(1, Ordering::SeqCst);
        if !self.finished {
            self.vault.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl MockVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base delay per part; parts with different indices finish in scrambled
    /// order.
    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = delay;
        self
    }

    pub fn with_slow_part(mut self, index: u32, delay: Duration) -> Self {
        self.slow_part = Some((index, delay));
        self
    }

    pub fn failing_part(mut self, index: u32) -> Self {
        self.failing_parts.insert(index);
        self
    }

    /// Flips one byte of the given part after accepting it.
    pub fn corrupting_part(mut self, index: u32) -> Self {
        self.corrupt_part = Some(index);
        self
    }

    pub fn failing_initiate(mut self) -> Self {
        self.fail_initiate = true;
        self
    }

    pub fn failing_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    /// Overrides the checksum reported by `complete_upload`.
    pub fn reporting_checksum(mut self, checksum: Option<&str>) -> Self {
        self.server_checksum = Some(checksum.map(str::to_string));
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> u32 {
        self.state.lock().unwrap().sessions
    }

    pub fn stored_parts(&self) -> usize {
        self.state.lock().unwrap().parts.len()
    }

    pub fn arrival_order(&self) -> Vec<u32> {
        self.state.lock().unwrap().arrival_order.clone()
    }

    pub fn completed(&self) -> Option<(u64, String)> {
        self.state.lock().unwrap().completed.clone()
    }

    fn delay_for(&self, index: u32) -> Duration {
        if let Some((slow, delay)) = self.slow_part
            && slow == index
        {
            return delay;
        }
        // 3, 1, 4, 2, 0, ... multiples of the base delay.
        self.part_delay * ((index * 3 + 3) % 5)
    }

    fn assembled(&self) -> Result<Vec<u8>, ServiceError> {
        let state = self.state.lock().unwrap();
        let mut data = Vec::new();
        for (start, bytes) in &state.parts {
            if *start != data.len() as u64 {
                return Err(rejected(400, "InvalidParameterValueException", "gap in parts"));
            }
            data.extend_from_slice(bytes);
        }
        Ok(data)
    }
}

fn rejected(status: u16, code: &str, message: &str) -> ServiceError {
    ServiceError::Rejected {
        status,
        code: code.into(),
        message: message.into(),
    }
}

impl ArchiveService for MockVault {
    fn initiate_upload<'a>(
        &'a self,
        _target_id: &'a str,
        _description: &'a str,
        _part_size: u64,
    ) -> ServiceFuture<'a, String> {
        Box::pin(async move {
            if self.fail_initiate {
                return Err(ServiceError::Transport("connection refused".into()));
            }
            let mut state = self.state.lock().unwrap();
            state.sessions += 1;
            Ok(format!("session-{}", state.sessions))
        })
    }

    fn upload_part(&self, part: PartUpload) -> ServiceFuture<'_, PartAck> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let mut guard = InFlightGuard {
                vault: self,
                finished: false,
            };

            self.state.lock().unwrap().arrival_order.push(part.index);
            tokio::time::sleep(self.delay_for(part.index)).await;
            guard.finished = true;

            if self.failing_parts.contains(&part.index) {
                return Err(rejected(500, "ServiceUnavailableException", "try later"));
            }

            let checksum = hash_part(&part.data);
            if checksum != part.tree_hash {
                return Err(rejected(
                    400,
                    "InvalidParameterValueException",
                    "checksum mismatch",
                ));
            }

            let mut data = part.data;
            if self.corrupt_part == Some(part.index) {
                data[0] ^= 0xff;
            }
            self.state.lock().unwrap().parts.insert(part.byte_start, data);

            Ok(PartAck {
                checksum: Some(checksum),
            })
        })
    }

    fn complete_upload<'a>(
        &'a self,
        target_id: &'a str,
        session_id: &'a str,
        total_size: u64,
        tree_hash: &'a str,
    ) -> ServiceFuture<'a, CompletedArchive> {
        Box::pin(async move {
            if self.fail_complete {
                return Err(rejected(404, "ResourceNotFoundException", "no such upload"));
            }

            let data = self.assembled()?;
            if data.len() as u64 != total_size {
                return Err(rejected(400, "InvalidParameterValueException", "size mismatch"));
            }

            self.state.lock().unwrap().completed = Some((total_size, tree_hash.to_string()));

            let checksum = match &self.server_checksum {
                Some(overridden) => overridden.clone(),
                None => Some(hash_part(&data)),
            };
            Ok(CompletedArchive {
                archive_id: format!("archive-{session_id}"),
                location: format!("/-/vaults/{target_id}/archives/archive-{session_id}"),
                checksum,
            })
        })
    }
}
