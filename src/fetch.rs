//! Audio search, download and transcode.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::BatchConfig;
use crate::resolve::SearchDescriptor;

/// Reason reported for items skipped because the batch was cancelled.
pub const CANCELLED_REASON: &str = "cancelled";

/// Outcome of fetching a single descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// The audio file was written to this path.
    Success(PathBuf),
    /// The item could not be fetched.
    Failed(String),
}

impl FetchResult {
    /// Returns `true` for [`FetchResult::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Creates the result used for items skipped by cancellation.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::Failed(CANCELLED_REASON.to_string())
    }
}

impl fmt::Display for FetchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(path) => write!(f, "saved {}", path.display()),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Fetches audio for one descriptor into a destination directory.
///
/// Implementations never fail past this boundary: every problem becomes
/// [`FetchResult::Failed`]. Sibling invocations may share a destination
/// directory, so each must write a distinct file and leave the others alone.
/// Once `cancel` fires an implementation should stop promptly; the
/// orchestrator only waits a bounded grace period before aborting it.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    async fn fetch(
        &self,
        descriptor: &SearchDescriptor,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> FetchResult;
}

/// Fetcher that drives an external `yt-dlp` process.
///
/// `yt-dlp` searches for the best match, downloads its best audio-only
/// stream and has `ffmpeg` transcode it to the configured codec and bitrate.
/// The process is killed as soon as the cancellation token fires.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    config: BatchConfig,
}

impl YtDlpFetcher {
    /// Creates a fetcher using the executable and audio settings in `config`.
    #[must_use]
    pub const fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    /// Builds the `yt-dlp` argument list for one descriptor.
    #[must_use]
    pub fn build_args(&self, descriptor: &SearchDescriptor, destination: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--no-playlist".into(),
            "--no-progress".into(),
            "--no-warnings".into(),
            "--format".into(),
            "bestaudio/best".into(),
            "--extract-audio".into(),
            "--audio-format".into(),
            self.config.audio_format.clone().into(),
            "--audio-quality".into(),
            format!("{}K", self.config.audio_quality_kbps).into(),
            "--output".into(),
            destination.join("%(title)s.%(ext)s").into_os_string(),
            "--print".into(),
            "after_move:filepath".into(),
        ];
        if let Some(ref ffmpeg) = self.config.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(ffmpeg.clone().into_os_string());
        }
        args.push(format!("ytsearch1:{}", descriptor.query()).into());
        args
    }

    async fn run(
        &self,
        descriptor: &SearchDescriptor,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> FetchResult {
        let args = self.build_args(descriptor, destination);
        log::debug!("Running {} {:?}", self.config.ytdlp_path.display(), args);

        // Dropping the output future kills the child.
        let process = Command::new(&self.config.ytdlp_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            () = cancel.cancelled() => {
                log::debug!("Killed yt-dlp for {descriptor}");
                return FetchResult::cancelled();
            }
            output = process => output,
        };
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return FetchResult::Failed(format!(
                    "cannot run {}: {e}",
                    self.config.ytdlp_path.display()
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no details")
                .trim()
                .to_string();
            return FetchResult::Failed(format!("yt-dlp exited with {}: {reason}", output.status));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_output_path(&stdout) {
            Some(path) if path.is_file() => FetchResult::Success(path),
            Some(path) => {
                FetchResult::Failed(format!("reported file {} does not exist", path.display()))
            }
            None => FetchResult::Failed("no matching audio found".to_string()),
        }
    }
}

#[async_trait]
impl AudioFetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        descriptor: &SearchDescriptor,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> FetchResult {
        if cancel.is_cancelled() {
            return FetchResult::cancelled();
        }
        self.run(descriptor, destination, cancel).await
    }
}

/// Returns the last non-empty line of `yt-dlp` output as the final file path.
fn parse_output_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(PathBuf::from)
}
