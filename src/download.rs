//! Concurrent batch download orchestration.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::{StreamExt, stream};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BatchConfig;
use crate::error::{Error, Result};
use crate::fetch::{AudioFetcher, FetchResult};
use crate::fs::{FileSystem, StagingDir, TokioFileSystem};
use crate::resolve::SearchDescriptor;
use crate::state::{BatchJob, BatchState};

/// Trait for receiving batch progress updates.
///
/// Methods may be called from worker tasks concurrently, so implementations
/// must serialize their own updates. All methods default to no-ops.
pub trait BatchProgress: Send + Sync {
    /// Called once the batch has been validated and dispatch begins.
    fn on_batch_start(&self, _total: usize) {}

    /// Called from a worker when it picks up a descriptor.
    fn on_item_start(&self, _descriptor: &SearchDescriptor) {}

    /// Called when a fetch result is processed, in completion order.
    fn on_item_complete(&self, _descriptor: &SearchDescriptor, _result: &FetchResult) {}

    /// Called after each processed completion with the running count.
    fn on_progress(&self, _completed: usize, _total: usize) {}

    /// Called when the coordinator stops waiting because of cancellation.
    fn on_cancelled(&self, _completed: usize, _total: usize) {}

    /// Called last, after cleanup, with the terminal state.
    fn on_finish(&self, _state: BatchState) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl BatchProgress for NoProgress {}

/// Terminal result of a batch.
#[derive(Debug)]
pub enum BatchOutcome {
    /// Every descriptor reported; `succeeded` of `total` produced a file.
    Completed { succeeded: usize, total: usize },
    /// The batch was cancelled after `succeeded` successful fetches.
    Cancelled { succeeded: usize, total: usize },
    /// An infrastructure or input failure aborted the batch.
    Failed(Error),
}

impl BatchOutcome {
    /// Number of successful fetches (zero for a failed batch).
    #[must_use]
    pub const fn succeeded(&self) -> usize {
        match self {
            Self::Completed { succeeded, .. } | Self::Cancelled { succeeded, .. } => *succeeded,
            Self::Failed(_) => 0,
        }
    }

    /// Number of descriptors in the batch (zero for a failed batch).
    #[must_use]
    pub const fn total(&self) -> usize {
        match self {
            Self::Completed { total, .. } | Self::Cancelled { total, .. } => *total,
            Self::Failed(_) => 0,
        }
    }

    /// The state the orchestrator is left in.
    #[must_use]
    pub const fn state(&self) -> BatchState {
        match self {
            Self::Completed { .. } => BatchState::Completed,
            Self::Cancelled { .. } => BatchState::Cancelled,
            Self::Failed(_) => BatchState::Failed,
        }
    }
}

/// Runs fetches for a batch of descriptors on a bounded worker pool.
pub struct BatchOrchestrator<F: FileSystem = TokioFileSystem> {
    fetcher: Arc<dyn AudioFetcher>,
    config: BatchConfig,
    fs: F,
    state: BatchState,
    job: Option<BatchJob>,
}

impl BatchOrchestrator<TokioFileSystem> {
    /// Creates an orchestrator with the default file system.
    #[must_use]
    pub fn new(fetcher: Arc<dyn AudioFetcher>, config: BatchConfig) -> Self {
        Self::with_fs(fetcher, config, TokioFileSystem)
    }
}

impl<F: FileSystem> BatchOrchestrator<F> {
    /// Creates an orchestrator with a custom file system implementation.
    #[must_use]
    pub fn with_fs(fetcher: Arc<dyn AudioFetcher>, config: BatchConfig, fs: F) -> Self {
        Self {
            fetcher,
            config,
            fs,
            state: BatchState::Idle,
            job: None,
        }
    }

    /// Returns the batch configuration.
    #[must_use]
    pub const fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> BatchState {
        self.state
    }

    /// Returns the completed count of the current or last batch.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.job.as_ref().map_or(0, BatchJob::completed)
    }

    /// Returns `true` if the last batch saw a cancellation request.
    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.job.as_ref().is_some_and(BatchJob::cancel_requested)
    }

    /// Returns the orchestrator to `Idle`.
    ///
    /// Discards the last job and removes anything left in its destination
    /// directory, such as files written by fetches that were still running
    /// when the batch was cancelled.
    pub async fn reset(&mut self) {
        if let Some(job) = self.job.take()
            && let Err(e) = self.fs.remove_dir_all(job.destination()).await
        {
            log::error!("Failed to clear {}: {e}", job.destination().display());
        }
        self.state = BatchState::Idle;
    }

    /// Runs a batch and cleans up its destination directory.
    ///
    /// Equivalent to [`run_batch_with`](Self::run_batch_with) with a no-op
    /// finalize step.
    pub async fn run_batch(
        &mut self,
        descriptors: Vec<SearchDescriptor>,
        destination: &Path,
        progress: &Arc<dyn BatchProgress>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        self.run_batch_with(descriptors, destination, progress, cancel, |_, _| Ok(()))
            .await
    }

    /// Runs a batch, hands the populated directory to `finalize`, then removes it.
    ///
    /// `finalize` only runs for a [`BatchOutcome::Completed`] batch; an error
    /// from it turns the outcome into [`BatchOutcome::Failed`]. The destination
    /// directory is removed on every exit path. Individual fetch failures are
    /// counted, never raised.
    pub async fn run_batch_with<P>(
        &mut self,
        descriptors: Vec<SearchDescriptor>,
        destination: &Path,
        progress: &Arc<dyn BatchProgress>,
        cancel: &CancellationToken,
        finalize: P,
    ) -> BatchOutcome
    where
        P: FnOnce(&Path, &BatchOutcome) -> Result<()>,
    {
        if self.state != BatchState::Idle {
            // Not a transition: the orchestrator keeps its current state.
            return BatchOutcome::Failed(Error::InvalidBatchInput(format!(
                "orchestrator is {}; reset before starting another batch",
                self.state
            )));
        }

        let outcome = self
            .execute(descriptors, destination, progress, cancel, finalize)
            .await;
        self.state = outcome.state();
        if let BatchOutcome::Failed(ref e) = outcome {
            log::error!("Batch failed: {e}");
        }
        progress.on_finish(self.state);
        outcome
    }

    async fn execute<P>(
        &mut self,
        descriptors: Vec<SearchDescriptor>,
        destination: &Path,
        progress: &Arc<dyn BatchProgress>,
        cancel: &CancellationToken,
        finalize: P,
    ) -> BatchOutcome
    where
        P: FnOnce(&Path, &BatchOutcome) -> Result<()>,
    {
        if descriptors.is_empty() {
            return BatchOutcome::Failed(Error::InvalidBatchInput(
                "no tracks to download".to_string(),
            ));
        }
        if self.config.concurrency == 0 {
            return BatchOutcome::Failed(Error::InvalidBatchInput(
                "concurrency limit must be at least 1".to_string(),
            ));
        }

        self.state = BatchState::Running;
        let staging = StagingDir::new(destination.to_path_buf());
        if let Err(e) = self.prepare(destination).await {
            staging.cleanup(&self.fs).await;
            return BatchOutcome::Failed(e);
        }

        let mut job = BatchJob::new(descriptors, destination.to_path_buf());
        log::info!(
            "Starting batch of {} into {} ({} workers)",
            job.total(),
            destination.display(),
            self.config.concurrency
        );
        progress.on_batch_start(job.total());

        let mut outcome = self.dispatch(&mut job, progress, cancel).await;
        if matches!(outcome, BatchOutcome::Completed { .. })
            && let Err(e) = finalize(staging.path(), &outcome)
        {
            outcome = BatchOutcome::Failed(e);
        }

        self.job = Some(job);
        staging.cleanup(&self.fs).await;
        outcome
    }

    async fn prepare(&self, destination: &Path) -> Result<()> {
        self.fs.create_dir_all(destination).await.map_err(|e| {
            Error::InvalidBatchInput(format!("cannot create {}: {e}", destination.display()))
        })?;
        self.fs.check_writable(destination).await.map_err(|e| {
            Error::InvalidBatchInput(format!("{} is not writable: {e}", destination.display()))
        })
    }

    /// Feeds descriptors through the worker pool and fans results back in.
    async fn dispatch(
        &self,
        job: &mut BatchJob,
        progress: &Arc<dyn BatchProgress>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let total = job.total();
        let destination: Arc<PathBuf> = Arc::new(job.destination().to_path_buf());
        let running: Mutex<Vec<AbortHandle>> = Mutex::new(Vec::new());

        // Each fetch runs in its own task. Descriptors pulled from the iterator
        // after a cancel are never spawned.
        let mut results = stream::iter(job.descriptors().to_vec())
            .map(|descriptor| {
                let handle = (!cancel.is_cancelled()).then(|| {
                    let fetcher = Arc::clone(&self.fetcher);
                    let destination = Arc::clone(&destination);
                    let progress = Arc::clone(progress);
                    let cancel = cancel.clone();
                    let item = descriptor.clone();
                    let handle = tokio::spawn(async move {
                        progress.on_item_start(&item);
                        fetcher.fetch(&item, &destination, &cancel).await
                    });
                    if let Ok(mut running) = running.lock() {
                        running.push(handle.abort_handle());
                    }
                    handle
                });
                async move {
                    let result = match handle {
                        Some(handle) => handle
                            .await
                            .unwrap_or_else(|e| FetchResult::Failed(format!("worker stopped: {e}"))),
                        None => FetchResult::cancelled(),
                    };
                    (descriptor, result)
                }
            })
            .buffer_unordered(self.config.concurrency);

        while !job.is_finished() {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                next = results.next() => next,
            };
            if cancel.is_cancelled() {
                job.request_cancel();
                break;
            }
            let Some((descriptor, result)) = next else {
                break;
            };

            match &result {
                FetchResult::Success(path) => {
                    log::info!("Fetched {descriptor} -> {}", path.display());
                }
                FetchResult::Failed(reason) => {
                    log::warn!("Could not fetch {descriptor}: {reason}");
                }
            }

            let completed = job.record_completion(result.is_success());
            progress.on_item_complete(&descriptor, &result);
            progress.on_progress(completed, total);
        }

        if job.cancel_requested() {
            // Results after the cancel are discarded, but running workers must
            // stop before the staging directory is removed.
            let grace = self.config.cancel_grace();
            let drained = tokio::time::timeout(grace, async {
                while results.next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                log::warn!(
                    "Fetches still running {}ms after cancel; aborting them",
                    grace.as_millis()
                );
                if let Ok(running) = running.lock() {
                    running.iter().for_each(AbortHandle::abort);
                }
                while results.next().await.is_some() {}
            }
        }

        if job.cancel_requested() {
            log::info!(
                "Batch cancelled after {}/{} completions",
                job.completed(),
                total
            );
            progress.on_cancelled(job.completed(), total);
            return BatchOutcome::Cancelled {
                succeeded: job.succeeded(),
                total,
            };
        }

        log::info!("Batch finished: {}/{} fetched", job.succeeded(), total);
        BatchOutcome::Completed {
            succeeded: job.succeeded(),
            total,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Fetcher that writes `<title>.mp3` unless the title is in `fail`.
    #[derive(Default)]
    pub struct ScriptedFetcher {
        pub fail: HashSet<String>,
        pub delay: Duration,
        pub started: AtomicUsize,
        pub running: AtomicUsize,
        pub max_running: AtomicUsize,
    }

    impl ScriptedFetcher {
        pub fn failing(titles: &[&str]) -> Self {
            Self {
                fail: titles.iter().map(ToString::to_string).collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl AudioFetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            descriptor: &SearchDescriptor,
            destination: &Path,
            cancel: &CancellationToken,
        ) -> FetchResult {
            if cancel.is_cancelled() {
                return FetchResult::cancelled();
            }
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail.contains(&descriptor.title) {
                return FetchResult::Failed("no match".to_string());
            }
            let path = destination.join(format!("{}.mp3", descriptor.title));
            match tokio::fs::write(&path, descriptor.query()).await {
                Ok(()) => FetchResult::Success(path),
                Err(e) => FetchResult::Failed(e.to_string()),
            }
        }
    }

    /// Progress sink that records every callback.
    #[derive(Default)]
    pub struct RecordingProgress {
        pub progress: Mutex<Vec<(usize, usize)>>,
        pub completed: Mutex<Vec<(String, bool)>>,
        pub cancelled: Mutex<Option<(usize, usize)>>,
        pub finished: Mutex<Option<BatchState>>,
    }

    impl BatchProgress for RecordingProgress {
        fn on_item_complete(&self, descriptor: &SearchDescriptor, result: &FetchResult) {
            self.completed
                .lock()
                .unwrap()
                .push((descriptor.title.clone(), result.is_success()));
        }

        fn on_progress(&self, completed: usize, total: usize) {
            self.progress.lock().unwrap().push((completed, total));
        }

        fn on_cancelled(&self, completed: usize, total: usize) {
            *self.cancelled.lock().unwrap() = Some((completed, total));
        }

        fn on_finish(&self, state: BatchState) {
            *self.finished.lock().unwrap() = Some(state);
        }
    }

    pub fn descriptors(titles: &[&str]) -> Vec<SearchDescriptor> {
        titles
            .iter()
            .map(|t| SearchDescriptor::new(*t, "Artist"))
            .collect()
    }

    fn orchestrator(fetcher: Arc<dyn AudioFetcher>, concurrency: usize) -> BatchOrchestrator {
        BatchOrchestrator::new(fetcher, BatchConfig::default().with_concurrency(concurrency))
    }

    #[tokio::test]
    async fn completes_with_partial_failures() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("downloads");
        let fetcher = Arc::new(ScriptedFetcher::failing(&["b"]));
        let recorder = Arc::new(RecordingProgress::default());
        let progress: Arc<dyn BatchProgress> = recorder.clone();
        let mut orch = orchestrator(fetcher, 5);

        let outcome = orch
            .run_batch(
                descriptors(&["a", "b", "c"]),
                &dest,
                &progress,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            outcome,
            BatchOutcome::Completed {
                succeeded: 2,
                total: 3
            }
        ));
        assert_eq!(orch.state(), BatchState::Completed);
        assert_eq!(orch.completed_count(), 3);
        assert!(!dest.exists());

        let counts: Vec<usize> = recorder.progress.lock().unwrap().iter().map(|p| p.0).collect();
        assert_eq!(counts, vec![1, 2, 3]);
        assert_eq!(*recorder.finished.lock().unwrap(), Some(BatchState::Completed));
    }

    #[tokio::test]
    async fn respects_concurrency_limit() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher {
            delay: Duration::from_millis(20),
            ..ScriptedFetcher::default()
        });
        let progress: Arc<dyn BatchProgress> = Arc::new(NoProgress);
        let mut orch = orchestrator(fetcher.clone(), 2);

        let titles: Vec<String> = (0..8).map(|i| format!("t{i}")).collect();
        let titles: Vec<&str> = titles.iter().map(String::as_str).collect();
        let outcome = orch
            .run_batch(
                descriptors(&titles),
                &dir.path().join("dl"),
                &progress,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.succeeded(), 8);
        assert!(fetcher.max_running.load(Ordering::SeqCst) <= 2);
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn progress_follows_completion_order() {
        struct SlowFirst;

        #[async_trait]
        impl AudioFetcher for SlowFirst {
            async fn fetch(
                &self,
                descriptor: &SearchDescriptor,
                destination: &Path,
                _cancel: &CancellationToken,
            ) -> FetchResult {
                if descriptor.title == "slow" {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                FetchResult::Success(destination.join(&descriptor.title))
            }
        }

        let dir = TempDir::new().unwrap();
        let recorder = Arc::new(RecordingProgress::default());
        let progress: Arc<dyn BatchProgress> = recorder.clone();
        let mut orch = orchestrator(Arc::new(SlowFirst), 5);

        orch.run_batch(
            descriptors(&["slow", "fast"]),
            &dir.path().join("dl"),
            &progress,
            &CancellationToken::new(),
        )
        .await;

        let order: Vec<String> = recorder
            .completed
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.0.clone())
            .collect();
        assert_eq!(order, vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn cancel_before_start_fetches_nothing() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("downloads");
        let fetcher = Arc::new(ScriptedFetcher::default());
        let recorder = Arc::new(RecordingProgress::default());
        let progress: Arc<dyn BatchProgress> = recorder.clone();
        let mut orch = orchestrator(fetcher.clone(), 5);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = orch
            .run_batch(descriptors(&["a", "b", "c"]), &dest, &progress, &cancel)
            .await;

        assert!(matches!(
            outcome,
            BatchOutcome::Cancelled {
                succeeded: 0,
                total: 3
            }
        ));
        assert_eq!(orch.state(), BatchState::Cancelled);
        assert!(orch.cancel_requested());
        assert!(!dest.exists());
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 0);
        assert_eq!(*recorder.cancelled.lock().unwrap(), Some((0, 3)));
    }

    #[tokio::test]
    async fn cancel_mid_batch_stops_dispatch() {
        struct CancelOnFirst {
            cancel: CancellationToken,
            started: AtomicUsize,
        }

        #[async_trait]
        impl AudioFetcher for CancelOnFirst {
            async fn fetch(
                &self,
                descriptor: &SearchDescriptor,
                destination: &Path,
                cancel: &CancellationToken,
            ) -> FetchResult {
                if cancel.is_cancelled() {
                    return FetchResult::cancelled();
                }
                self.started.fetch_add(1, Ordering::SeqCst);
                self.cancel.cancel();
                FetchResult::Success(destination.join(&descriptor.title))
            }
        }

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("downloads");
        let cancel = CancellationToken::new();
        let fetcher = Arc::new(CancelOnFirst {
            cancel: cancel.clone(),
            started: AtomicUsize::new(0),
        });
        let progress: Arc<dyn BatchProgress> = Arc::new(NoProgress);
        let mut orch = orchestrator(fetcher.clone(), 1);

        let outcome = orch
            .run_batch(
                descriptors(&["a", "b", "c", "d"]),
                &dest,
                &progress,
                &cancel,
            )
            .await;

        assert!(matches!(outcome, BatchOutcome::Cancelled { total: 4, .. }));
        assert!(outcome.succeeded() <= 1);
        assert!(orch.completed_count() <= 1);
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 1);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn cancel_after_completion_keeps_outcome() {
        let dir = TempDir::new().unwrap();
        let progress: Arc<dyn BatchProgress> = Arc::new(NoProgress);
        let mut orch = orchestrator(Arc::new(ScriptedFetcher::default()), 5);
        let cancel = CancellationToken::new();

        let outcome = orch
            .run_batch(descriptors(&["a", "b"]), &dir.path().join("dl"), &progress, &cancel)
            .await;
        cancel.cancel();

        assert!(matches!(
            outcome,
            BatchOutcome::Completed {
                succeeded: 2,
                total: 2
            }
        ));
        assert_eq!(orch.state(), BatchState::Completed);
    }

    #[tokio::test]
    async fn empty_batch_is_invalid_input() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("dl");
        let progress: Arc<dyn BatchProgress> = Arc::new(NoProgress);
        let mut orch = orchestrator(Arc::new(ScriptedFetcher::default()), 5);

        let outcome = orch
            .run_batch(Vec::new(), &dest, &progress, &CancellationToken::new())
            .await;

        assert!(matches!(
            outcome,
            BatchOutcome::Failed(Error::InvalidBatchInput(_))
        ));
        assert_eq!(orch.state(), BatchState::Failed);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn zero_concurrency_is_invalid_input() {
        let dir = TempDir::new().unwrap();
        let progress: Arc<dyn BatchProgress> = Arc::new(NoProgress);
        let mut orch = orchestrator(Arc::new(ScriptedFetcher::default()), 0);

        let outcome = orch
            .run_batch(
                descriptors(&["a"]),
                &dir.path().join("dl"),
                &progress,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            outcome,
            BatchOutcome::Failed(Error::InvalidBatchInput(_))
        ));
    }

    #[tokio::test]
    async fn terminal_state_requires_reset() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("dl");
        let progress: Arc<dyn BatchProgress> = Arc::new(NoProgress);
        let mut orch = orchestrator(Arc::new(ScriptedFetcher::default()), 5);
        let cancel = CancellationToken::new();

        orch.run_batch(descriptors(&["a"]), &dest, &progress, &cancel)
            .await;
        let second = orch
            .run_batch(descriptors(&["b"]), &dest, &progress, &cancel)
            .await;
        assert!(matches!(
            second,
            BatchOutcome::Failed(Error::InvalidBatchInput(_))
        ));
        assert_eq!(orch.state(), BatchState::Completed);

        orch.reset().await;
        assert_eq!(orch.state(), BatchState::Idle);
        assert_eq!(orch.completed_count(), 0);
        assert!(!orch.cancel_requested());

        let third = orch
            .run_batch(descriptors(&["b"]), &dest, &progress, &cancel)
            .await;
        assert!(matches!(third, BatchOutcome::Completed { succeeded: 1, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_run_kills_running_ytdlp_before_cleanup() {
        use crate::fetch::YtDlpFetcher;
        use crate::fetch::tests::slow_ytdlp;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("downloads");
        let script = slow_ytdlp(dir.path(), &dest, 1);
        let config = BatchConfig::default()
            .with_concurrency(2)
            .with_ytdlp_path(script);
        let fetcher = Arc::new(YtDlpFetcher::new(config.clone()));
        let progress: Arc<dyn BatchProgress> = Arc::new(NoProgress);
        let mut orch = BatchOrchestrator::new(fetcher, config);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let outcome = orch
            .run_batch(descriptors(&["a", "b"]), &dest, &progress, &cancel)
            .await;

        assert!(matches!(
            outcome,
            BatchOutcome::Cancelled {
                succeeded: 0,
                total: 2
            }
        ));
        assert!(!dest.exists());
        // Past the point where the scripts would have written their files.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn cancel_aborts_fetchers_that_ignore_it() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("downloads");
        // Sleeps through the cancel, then writes into the staging directory.
        let fetcher = Arc::new(ScriptedFetcher {
            delay: Duration::from_millis(500),
            ..ScriptedFetcher::default()
        });
        let config = BatchConfig::default()
            .with_concurrency(2)
            .with_cancel_grace(Duration::from_millis(50));
        let progress: Arc<dyn BatchProgress> = Arc::new(NoProgress);
        let mut orch = BatchOrchestrator::new(fetcher.clone(), config);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = orch
            .run_batch(descriptors(&["a", "b", "c"]), &dest, &progress, &cancel)
            .await;

        assert!(matches!(outcome, BatchOutcome::Cancelled { total: 3, .. }));
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 2);
        assert!(!dest.exists());
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn cancel_waits_for_fetchers_within_grace() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("downloads");
        let fetcher = Arc::new(ScriptedFetcher {
            delay: Duration::from_millis(200),
            ..ScriptedFetcher::default()
        });
        let progress: Arc<dyn BatchProgress> = Arc::new(NoProgress);
        let mut orch = orchestrator(fetcher.clone(), 1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = orch
            .run_batch(descriptors(&["a", "b"]), &dest, &progress, &cancel)
            .await;

        assert!(matches!(
            outcome,
            BatchOutcome::Cancelled {
                succeeded: 0,
                total: 2
            }
        ));
        // The first fetch ran to completion; the second was never spawned.
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.running.load(Ordering::SeqCst), 0);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn finalize_sees_files_before_cleanup() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("dl");
        let progress: Arc<dyn BatchProgress> = Arc::new(NoProgress);
        let mut orch = orchestrator(Arc::new(ScriptedFetcher::failing(&["b"])), 5);
        let mut seen = Vec::new();

        let outcome = orch
            .run_batch_with(
                descriptors(&["a", "b"]),
                &dest,
                &progress,
                &CancellationToken::new(),
                |path, outcome| {
                    assert_eq!(outcome.succeeded(), 1);
                    for entry in std::fs::read_dir(path)? {
                        seen.push(entry?.file_name().to_string_lossy().into_owned());
                    }
                    Ok(())
                },
            )
            .await;

        assert!(matches!(outcome, BatchOutcome::Completed { .. }));
        assert_eq!(seen, vec!["a.mp3"]);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn finalize_error_fails_batch_and_still_cleans_up() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("dl");
        let progress: Arc<dyn BatchProgress> = Arc::new(NoProgress);
        let mut orch = orchestrator(Arc::new(ScriptedFetcher::default()), 5);

        let outcome = orch
            .run_batch_with(
                descriptors(&["a"]),
                &dest,
                &progress,
                &CancellationToken::new(),
                |_, _| Err(Error::Packaging("disk full".to_string())),
            )
            .await;

        assert!(matches!(outcome, BatchOutcome::Failed(Error::Packaging(_))));
        assert_eq!(orch.state(), BatchState::Failed);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn finalize_skipped_when_cancelled() {
        let dir = TempDir::new().unwrap();
        let progress: Arc<dyn BatchProgress> = Arc::new(NoProgress);
        let mut orch = orchestrator(Arc::new(ScriptedFetcher::default()), 5);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut called = false;

        orch.run_batch_with(
            descriptors(&["a"]),
            &dir.path().join("dl"),
            &progress,
            &cancel,
            |_, _| {
                called = true;
                Ok(())
            },
        )
        .await;

        assert!(!called);
    }

    // =========================================================================
    // Mock file system
    // =========================================================================

    /// File system whose staging directory refuses writes.
    struct ReadOnlyFileSystem {
        removed: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl FileSystem for ReadOnlyFileSystem {
        async fn create_dir_all(&self, _path: &Path) -> std::io::Result<()> {
            Ok(())
        }

        async fn check_writable(&self, _dir: &Path) -> std::io::Result<()> {
            Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            ))
        }

        async fn remove_dir_all(&self, path: &Path) -> std::io::Result<()> {
            self.removed.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    #[tokio::test]
    async fn unwritable_destination_fails_batch() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let fs = ReadOnlyFileSystem {
            removed: Mutex::new(Vec::new()),
        };
        let progress: Arc<dyn BatchProgress> = Arc::new(NoProgress);
        let mut orch = BatchOrchestrator::with_fs(fetcher.clone(), BatchConfig::default(), fs);

        let outcome = orch
            .run_batch(
                descriptors(&["a"]),
                Path::new("/readonly/dl"),
                &progress,
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            outcome,
            BatchOutcome::Failed(Error::InvalidBatchInput(_))
        ));
        assert_eq!(fetcher.started.load(Ordering::SeqCst), 0);
        assert_eq!(
            *orch.fs.removed.lock().unwrap(),
            vec![PathBuf::from("/readonly/dl")]
        );
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(24))]

            #[test]
            fn successes_plus_failures_equal_total(
                failures in proptest::collection::vec(any::<bool>(), 1..12),
                concurrency in 1usize..6,
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                let titles: Vec<String> = (0..failures.len()).map(|i| format!("t{i}")).collect();
                let failing: Vec<&str> = titles
                    .iter()
                    .zip(&failures)
                    .filter(|(_, fail)| **fail)
                    .map(|(t, _)| t.as_str())
                    .collect();
                let expected_failures = failing.len();
                let fetcher = Arc::new(ScriptedFetcher::failing(&failing));
                let dir = TempDir::new().unwrap();

                let outcome = runtime.block_on(async {
                    let progress: Arc<dyn BatchProgress> = Arc::new(NoProgress);
                    let mut orch = orchestrator(fetcher, concurrency);
                    let refs: Vec<&str> = titles.iter().map(String::as_str).collect();
                    orch.run_batch(
                        descriptors(&refs),
                        &dir.path().join("dl"),
                        &progress,
                        &CancellationToken::new(),
                    )
                    .await
                });

                let BatchOutcome::Completed { succeeded, total } = outcome else {
                    panic!("expected completed batch");
                };
                prop_assert_eq!(total, failures.len());
                prop_assert!(succeeded <= total);
                prop_assert_eq!(succeeded + expected_failures, total);
            }
        }
    }
}
