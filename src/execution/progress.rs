//! Progress tracking and cancellation for streamed execution.

use crate::core::error::NodeId;
use crate::core::region::ImageRegion;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A progress update event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// Streaming has started.
    Started { total_pieces: usize },
    /// A piece is about to be pulled.
    PieceStarted {
        index: usize,
        total: usize,
        region: ImageRegion,
    },
    /// A piece was pulled and written.
    PieceCompleted {
        index: usize,
        total: usize,
        duration_ms: u64,
    },
    /// Overall progress percentage.
    Progress {
        percent: f32,
        elapsed_ms: u64,
        estimated_remaining_ms: Option<u64>,
    },
    /// Streaming has completed.
    Completed {
        total_duration_ms: u64,
        pieces_processed: usize,
    },
    /// Streaming was cancelled.
    Cancelled,
    /// An error occurred.
    Error {
        node_id: Option<NodeId>,
        message: String,
    },
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

#[derive(Debug, Default)]
struct RunState {
    total: usize,
    completed: usize,
    started: Option<Instant>,
    busy_ms: u64,
}

/// Streaming progress shared with the caller, who may cancel from another
/// thread. Cancellation takes effect before the next piece.
#[derive(Default)]
pub struct ProgressTracker {
    run: Mutex<RunState>,
    cancelled: AtomicBool,
    callback: Option<ProgressCallback>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("run", &*self.run.lock())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker behind an `Arc`, ready to hand to another thread.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Receive every event through `callback`.
    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Begin a run of `total_pieces` pieces.
    pub fn start(&self, total_pieces: usize) {
        *self.run.lock() = RunState {
            total: total_pieces,
            started: Some(Instant::now()),
            ..RunState::default()
        };
        self.emit(ProgressUpdate::Started { total_pieces });
    }

    pub fn piece_started(&self, index: usize, region: ImageRegion) {
        let total = self.run.lock().total;
        self.emit(ProgressUpdate::PieceStarted { index, total, region });
    }

    pub fn piece_completed(&self, index: usize, duration_ms: u64) {
        let total = {
            let mut run = self.run.lock();
            run.completed += 1;
            run.busy_ms += duration_ms;
            run.total
        };
        self.emit(ProgressUpdate::PieceCompleted {
            index,
            total,
            duration_ms,
        });
        self.emit(ProgressUpdate::Progress {
            percent: self.progress_percent(),
            elapsed_ms: self.elapsed_ms(),
            estimated_remaining_ms: self.estimated_remaining_ms(),
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.emit(ProgressUpdate::Cancelled);
    }

    pub fn report_error(&self, node_id: Option<NodeId>, message: String) {
        self.emit(ProgressUpdate::Error { node_id, message });
    }

    pub fn complete(&self) {
        let pieces_processed = self.completed();
        self.emit(ProgressUpdate::Completed {
            total_duration_ms: self.elapsed_ms(),
            pieces_processed,
        });
    }

    /// Number of completed pieces.
    pub fn completed(&self) -> usize {
        self.run.lock().completed
    }

    /// Share of pieces completed, 100 for an empty run.
    pub fn progress_percent(&self) -> f32 {
        let run = self.run.lock();
        if run.total == 0 {
            100.0
        } else {
            run.completed as f32 * 100.0 / run.total as f32
        }
    }

    /// Remaining pieces times the mean piece duration so far.
    pub fn estimated_remaining_ms(&self) -> Option<u64> {
        let run = self.run.lock();
        if run.completed == 0 {
            return None;
        }
        let mean = run.busy_ms / run.completed as u64;
        Some(mean * run.total.saturating_sub(run.completed) as u64)
    }

    fn elapsed_ms(&self) -> u64 {
        self.run
            .lock()
            .started
            .map_or(0, |t| t.elapsed().as_millis() as u64)
    }

    fn emit(&self, update: ProgressUpdate) {
        if let Some(callback) = &self.callback {
            callback(update);
        }
    }
}
