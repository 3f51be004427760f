//! One URL in, one archive out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;

use crate::archive::ArchivePackager;
use crate::download::{BatchOrchestrator, BatchOutcome, BatchProgress};
use crate::error::{Error, Result};
use crate::fs::{FileSystem, TokioFileSystem};
use crate::resolve::MetadataResolver;
use crate::url::SourceKind;

/// Result of a pipeline run that reached dispatch.
#[derive(Debug)]
pub struct PipelineReport {
    /// Kind of the resolved reference.
    pub kind: SourceKind,
    /// Batch outcome; never [`BatchOutcome::Failed`].
    pub outcome: BatchOutcome,
    /// Archive or copied track, if anything was delivered.
    pub delivered: Option<PathBuf>,
}

/// Resolves a URL, downloads its tracks into a staging directory and packages them.
pub struct Pipeline<F: FileSystem = TokioFileSystem> {
    resolver: MetadataResolver,
    orchestrator: BatchOrchestrator<F>,
    packager: ArchivePackager,
    staging_dir: PathBuf,
}

impl<F: FileSystem> Pipeline<F> {
    #[must_use]
    pub fn new(
        resolver: MetadataResolver,
        orchestrator: BatchOrchestrator<F>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolver,
            orchestrator,
            packager: ArchivePackager::new(),
            staging_dir: staging_dir.into(),
        }
    }

    #[must_use]
    pub const fn orchestrator(&self) -> &BatchOrchestrator<F> {
        &self.orchestrator
    }

    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Runs the full flow for `url`.
    ///
    /// Collections are packed into `archive_path`. A single track is copied
    /// into the directory that would hold the archive. Nothing is delivered
    /// when the batch is cancelled or no track was fetched.
    ///
    /// Packaging is synchronous file and ZIP work. On a multi-threaded runtime
    /// it runs under [`tokio::task::block_in_place`]; on a current-thread
    /// runtime it blocks the runtime until the archive is written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBatchInput`] if the archive's directory does not
    /// exist, resolution errors from [`MetadataResolver::resolve`], and the
    /// error of a failed batch (including packaging failures).
    pub async fn run(
        &mut self,
        url: &str,
        archive_path: &Path,
        progress: &Arc<dyn BatchProgress>,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport> {
        let output_dir = output_dir(archive_path);
        if !output_dir.is_dir() {
            return Err(Error::InvalidBatchInput(format!(
                "output directory {} does not exist",
                output_dir.display()
            )));
        }

        let (kind, descriptors) = self.resolver.resolve(url).await?;
        self.orchestrator.reset().await;

        let packager = self.packager;
        let mut delivered = None;
        let outcome = self
            .orchestrator
            .run_batch_with(
                descriptors,
                &self.staging_dir,
                progress,
                cancel,
                |staging, outcome| {
                    if outcome.succeeded() == 0 {
                        log::warn!("No tracks were fetched; nothing to package");
                        return Ok(());
                    }
                    let path = run_blocking(|| -> Result<PathBuf> {
                        if kind.is_collection() {
                            packager.pack(staging, archive_path)?;
                            Ok(archive_path.to_path_buf())
                        } else {
                            copy_single(staging, output_dir)
                        }
                    })?;
                    delivered = Some(path);
                    Ok(())
                },
            )
            .await;

        match outcome {
            BatchOutcome::Failed(e) => Err(e),
            outcome => Ok(PipelineReport {
                kind,
                outcome,
                delivered,
            }),
        }
    }
}

/// Runs blocking work without stalling other tasks on a multi-threaded runtime.
fn run_blocking<T>(work: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

fn output_dir(archive_path: &Path) -> &Path {
    archive_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Copies the one file in `staging` into `output_dir`.
fn copy_single(staging: &Path, output_dir: &Path) -> Result<PathBuf> {
    let packaging = |e: std::io::Error| Error::Packaging(format!("cannot deliver track: {e}"));

    let mut file = None;
    for entry in std::fs::read_dir(staging).map_err(packaging)? {
        let entry = entry.map_err(packaging)?;
        if entry.file_type().map_err(packaging)?.is_file() {
            file = Some(entry.path());
            break;
        }
    }
    let source = file.ok_or_else(|| {
        Error::Packaging(format!("no downloaded file in {}", staging.display()))
    })?;
    let Some(name) = source.file_name() else {
        return Err(Error::Packaging(format!("unnamed file {}", source.display())));
    };

    let target = output_dir.join(name);
    std::fs::copy(&source, &target).map_err(packaging)?;
    log::info!("Delivered {}", target.display());
    Ok(target)
}
