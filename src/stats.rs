//! Batch statistics.

use std::time::{Duration, Instant};

use crate::fetch::FetchResult;
use crate::resolve::SearchDescriptor;

/// Summary of a finished batch.
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    /// Number of tracks fetched.
    pub succeeded: usize,
    /// Number of tracks that failed.
    pub failed: usize,
    /// Time from the first dispatch to the last result.
    pub elapsed: Duration,
    /// Failed tracks with their reasons, in completion order.
    pub failures: Vec<(String, String)>,
}

impl BatchStats {
    /// Number of tracks that reported a result.
    #[must_use]
    pub const fn completed(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Average time per completed track.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn average_per_track(&self) -> Option<Duration> {
        match self.completed() {
            0 => None,
            n => Some(self.elapsed / n as u32),
        }
    }
}

/// Accumulates [`BatchStats`] from item results as they arrive.
pub struct BatchStatsBuilder {
    succeeded: usize,
    failures: Vec<(String, String)>,
    start_time: Instant,
}

impl Default for BatchStatsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchStatsBuilder {
    /// Starts the clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            succeeded: 0,
            failures: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records one item result.
    pub fn record(&mut self, descriptor: &SearchDescriptor, result: &FetchResult) {
        match result {
            FetchResult::Success(_) => self.succeeded += 1,
            FetchResult::Failed(reason) => {
                self.failures.push((descriptor.to_string(), reason.clone()));
            }
        }
    }

    #[must_use]
    pub fn build(self) -> BatchStats {
        BatchStats {
            succeeded: self.succeeded,
            failed: self.failures.len(),
            elapsed: self.start_time.elapsed(),
            failures: self.failures,
        }
    }
}
