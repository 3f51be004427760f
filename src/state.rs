//! Batch lifecycle state.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::resolve::SearchDescriptor;

/// Lifecycle of the orchestrator.
///
/// `Idle → Running → {Completed, Cancelled, Failed}`; a terminal state only
/// returns to `Idle` through an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl BatchState {
    /// Returns `true` for states that require a reset before the next batch.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Book-keeping for one batch, written only by the coordinator.
#[derive(Debug, Clone)]
pub struct BatchJob {
    descriptors: Vec<SearchDescriptor>,
    destination: PathBuf,
    completed: usize,
    succeeded: usize,
    cancel_requested: bool,
}

impl BatchJob {
    /// Creates a job with nothing completed.
    #[must_use]
    pub const fn new(descriptors: Vec<SearchDescriptor>, destination: PathBuf) -> Self {
        Self {
            descriptors,
            destination,
            completed: 0,
            succeeded: 0,
            cancel_requested: false,
        }
    }

    #[must_use]
    pub fn descriptors(&self) -> &[SearchDescriptor] {
        &self.descriptors
    }

    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub const fn completed(&self) -> usize {
        self.completed
    }

    #[must_use]
    pub const fn succeeded(&self) -> usize {
        self.succeeded
    }

    #[must_use]
    pub const fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Returns `true` once every descriptor has reported.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.completed == self.total()
    }

    /// Records one finished fetch and returns the new completed count.
    ///
    /// The count never exceeds the number of descriptors.
    pub fn record_completion(&mut self, success: bool) -> usize {
        if self.completed < self.total() {
            self.completed += 1;
            if success {
                self.succeeded += 1;
            }
        } else {
            log::warn!("Ignoring completion beyond batch size {}", self.total());
        }
        self.completed
    }

    /// Marks the job as cancelled. There is no way to clear the flag.
    pub const fn request_cancel(&mut self) {
        self.cancel_requested = true;
    }
}
