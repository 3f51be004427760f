//! Configuration types for batch downloads.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of concurrent fetches.
///
/// Small enough to stay within typical provider rate limits.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default time running fetches get to stop after a cancel before they are aborted.
pub const DEFAULT_CANCEL_GRACE_MS: u64 = 10_000;

/// Configuration for a batch of audio fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of concurrent fetches.
    pub concurrency: usize,
    /// Target audio codec passed to the transcoder.
    pub audio_format: String,
    /// Target audio bitrate in kbps.
    pub audio_quality_kbps: u32,
    /// Path or name of the `yt-dlp` executable.
    pub ytdlp_path: PathBuf,
    /// Location of the `ffmpeg` binary, if not on `PATH`.
    pub ffmpeg_location: Option<PathBuf>,
    /// Milliseconds to wait for running fetches after a cancel.
    pub cancel_grace_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            audio_format: "mp3".to_string(),
            audio_quality_kbps: 192,
            ytdlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_location: None,
            cancel_grace_ms: DEFAULT_CANCEL_GRACE_MS,
        }
    }
}

impl BatchConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of concurrent fetches.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the target codec and bitrate.
    #[must_use]
    pub fn with_audio(mut self, format: impl Into<String>, quality_kbps: u32) -> Self {
        self.audio_format = format.into();
        self.audio_quality_kbps = quality_kbps;
        self
    }

    /// Sets the `yt-dlp` executable.
    #[must_use]
    pub fn with_ytdlp_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ytdlp_path = path.into();
        self
    }

    /// Sets the `ffmpeg` location.
    #[must_use]
    pub fn with_ffmpeg_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_location = Some(path.into());
        self
    }

    /// Sets how long running fetches may take to stop after a cancel.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Returns the post-cancel grace period.
    #[must_use]
    pub const fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

/// Path configuration for staging and credential files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Working directory that fetched audio is staged in; removed after every batch.
    pub staging_dir: PathBuf,
    /// Two-line plaintext credential record.
    pub credentials_file: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            staging_dir: PathBuf::from("downloads"),
            credentials_file: config_dir.join("sytadel").join("credentials.txt"),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Batch configuration.
    pub batch: BatchConfig,
    /// Path configuration.
    pub paths: PathConfig,
}

impl AppConfig {
    /// Returns the default location of the configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sytadel")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file.
    ///
    /// A missing file yields the defaults; keys absent from the file keep
    /// their default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&contents).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}
