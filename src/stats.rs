//! Capture statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Snapshot of a session's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Frames taken off the device queue
    pub frames_received: u64,

    /// Frames whose fullsize image reached disk
    pub frames_persisted: u64,

    /// Thumbnails written
    pub thumbnails_persisted: u64,

    /// Frames lost because the device queue was full
    pub queue_dropped: u64,

    /// Frames skipped while the pipeline was at capacity
    pub pipeline_dropped: u64,

    /// Frames ignored outside the active state, or with no buffer
    pub frames_skipped: u64,

    /// Frames dropped because encoding failed
    pub encode_errors: u64,

    /// Frames dropped because writing failed
    pub persist_errors: u64,
}

impl SessionStats {
    /// Persisted frame rate based on delta
    pub fn calculate_fps(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }

        let frames_delta = self.frames_persisted.saturating_sub(previous.frames_persisted);
        frames_delta as f64 / elapsed_secs
    }

    /// Share of offered frames that never reached disk
    pub fn drop_rate(&self) -> f64 {
        let offered = self.frames_received + self.queue_dropped;
        if offered == 0 {
            return 0.0;
        }

        let lost = offered.saturating_sub(self.frames_persisted);
        lost as f64 / offered as f64
    }
}

/// Live counters shared between a session task and its pipelines
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub frames_received: AtomicU64,
    pub frames_persisted: AtomicU64,
    pub thumbnails_persisted: AtomicU64,
    pub queue_dropped: Arc<AtomicU64>,
    pub pipeline_dropped: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub encode_errors: AtomicU64,
    pub persist_errors: AtomicU64,
}

impl SessionCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_persisted: self.frames_persisted.load(Ordering::Relaxed),
            thumbnails_persisted: self.thumbnails_persisted.load(Ordering::Relaxed),
            queue_dropped: self.queue_dropped.load(Ordering::Relaxed),
            pipeline_dropped: self.pipeline_dropped.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            persist_errors: self.persist_errors.load(Ordering::Relaxed),
        }
    }
}
