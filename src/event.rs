//! Batch events delivered over a channel.
//!
//! [`ChannelProgress`] turns progress callbacks into [`BatchEvent`] messages so
//! a single consumer (the terminal UI) owns all display state.

use tokio::sync::mpsc;

use crate::download::BatchProgress;
use crate::fetch::FetchResult;
use crate::resolve::SearchDescriptor;
use crate::state::BatchState;

/// Events sent from the orchestrator and its workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    /// Dispatch began for `total` descriptors.
    Started { total: usize },
    /// A worker picked up a descriptor.
    ItemStarted { descriptor: SearchDescriptor },
    /// A fetch result was processed.
    ItemCompleted {
        descriptor: SearchDescriptor,
        result: FetchResult,
    },
    /// Running completion count.
    Progress { completed: usize, total: usize },
    /// The coordinator stopped waiting because of cancellation.
    Cancelled { completed: usize, total: usize },
    /// The batch reached a terminal state; no further events follow from the coordinator.
    Finished { state: BatchState },
}

/// Progress sink that forwards every callback as a [`BatchEvent`].
///
/// Send failures are ignored: a consumer that has gone away only loses
/// display updates.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<BatchEvent>,
}

impl ChannelProgress {
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<BatchEvent>) -> Self {
        Self { tx }
    }

    /// Creates a sink together with the receiving end.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: BatchEvent) {
        let _ = self.tx.send(event);
    }
}

impl BatchProgress for ChannelProgress {
    fn on_batch_start(&self, total: usize) {
        self.send(BatchEvent::Started { total });
    }

    fn on_item_start(&self, descriptor: &SearchDescriptor) {
        self.send(BatchEvent::ItemStarted {
            descriptor: descriptor.clone(),
        });
    }

    fn on_item_complete(&self, descriptor: &SearchDescriptor, result: &FetchResult) {
        self.send(BatchEvent::ItemCompleted {
            descriptor: descriptor.clone(),
            result: result.clone(),
        });
    }

    fn on_progress(&self, completed: usize, total: usize) {
        self.send(BatchEvent::Progress { completed, total });
    }

    fn on_cancelled(&self, completed: usize, total: usize) {
        self.send(BatchEvent::Cancelled { completed, total });
    }

    fn on_finish(&self, state: BatchState) {
        self.send(BatchEvent::Finished { state });
    }
}
