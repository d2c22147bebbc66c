use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time copy of [`PartProgress`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub dispatched: u32,
    pub completed: u32,
    pub total_parts: u32,
    pub bytes_completed: u64,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Average throughput since tracking started, in bytes per second.
    ///
    /// Returns 0.0 before any time has elapsed.
    pub fn bytes_per_second(&self) -> f64 {
        if self.elapsed.is_zero() {
            return 0.0;
        }
        self.bytes_completed as f64 / self.elapsed.as_secs_f64()
    }

    /// Fraction of parts completed, in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total_parts == 0 {
            return 1.0;
        }
        self.completed as f64 / self.total_parts as f64
    }
}

/// Dispatched/completed part counters shared by concurrent uploads.
///
/// Updates are plain atomic increments; the counters are for reporting only.
#[derive(Debug)]
pub struct PartProgress {
    total_parts: u32,
    dispatched: AtomicU32,
    completed: AtomicU32,
    bytes_completed: AtomicU64,
    started_at: Instant,
}

impl PartProgress {
    pub fn new(total_parts: u32) -> Self {
        Self {
            total_parts,
            dispatched: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            bytes_completed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Records a dispatched part and returns the new dispatched count.
    pub fn record_dispatched(&self) -> u32 {
        self.dispatched.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Records a part the service accepted and returns the new completed
    /// count.
    pub fn record_completed(&self, bytes: u64) -> u32 {
        self.bytes_completed.fetch_add(bytes, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Records a part that failed or was cancelled. Its bytes are not
    /// counted.
    pub fn record_failed(&self) -> u32 {
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn total_parts(&self) -> u32 {
        self.total_parts
    }

    pub fn dispatched(&self) -> u32 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            dispatched: self.dispatched(),
            completed: self.completed(),
            total_parts: self.total_parts,
            bytes_completed: self.bytes_completed.load(Ordering::Relaxed),
            elapsed: self.started_at.elapsed(),
        }
    }
}

/// Formats a byte count for logs, e.g. `1.20 GB`.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    const TB: u64 = 1024 * GB;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}
