//! Transfer progress reporting
//!
//! Reporters are passed explicitly into `read`, `write` and `copy` and are
//! invoked synchronously at chunk boundaries with the cumulative byte count.

use std::sync::Arc;

/// Cumulative progress of a single transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes transferred so far; never decreases within a transfer
    pub transferred: u64,
    /// Total size when known up front; fixed for the whole transfer
    pub total: Option<u64>,
}

impl TransferProgress {
    /// Completed fraction in `0.0..=1.0`, when the total is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.transferred as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Receives progress updates during a streamed transfer
#[cfg_attr(test, mockall::automock)]
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: TransferProgress);
}

impl<F> ProgressReporter for F
where
    F: Fn(TransferProgress) + Send + Sync,
{
    fn report(&self, progress: TransferProgress) {
        self(progress)
    }
}

/// Shared handle to a reporter, as threaded through the storage operations
pub type Progress = Arc<dyn ProgressReporter>;

/// Reporter that logs each update through `tracing`
#[derive(Debug, Clone)]
pub struct LogProgress {
    label: String,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProgressReporter for LogProgress {
    fn report(&self, progress: TransferProgress) {
        let done = humansize::format_size(progress.transferred, humansize::BINARY);
        match (progress.total, progress.fraction()) {
            (Some(total), Some(fraction)) => tracing::info!(
                "{} >> {}/{} ({:.0}%)",
                self.label,
                done,
                humansize::format_size(total, humansize::BINARY),
                fraction * 100.0
            ),
            _ => tracing::info!("{} >> {}", self.label, done),
        }
    }
}

/// Accumulates chunk sizes and forwards cumulative totals to a reporter
pub(crate) struct ProgressTracker {
    reporter: Progress,
    transferred: u64,
    total: Option<u64>,
    reported: bool,
}

impl ProgressTracker {
    pub(crate) fn new(total: Option<u64>, reporter: Progress) -> Self {
        Self {
            reporter,
            transferred: 0,
            total,
            reported: false,
        }
    }

    pub(crate) fn advance(&mut self, bytes: u64) {
        if bytes == 0 {
            return;
        }
        self.transferred += bytes;
        self.emit();
    }

    /// Called at end of stream so empty transfers still see one update
    pub(crate) fn finish(&mut self) {
        if !self.reported {
            self.emit();
        }
    }

    fn emit(&mut self) {
        self.reported = true;
        self.reporter.report(TransferProgress {
            transferred: self.transferred,
            total: self.total,
        });
    }
}
