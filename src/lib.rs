//! sytadel - downloads the audio of catalog tracks, albums and playlists.
//!
//! A catalog URL is resolved into search descriptors, each descriptor is
//! fetched by an external downloader on a bounded worker pool, and the
//! results are packed into a ZIP archive. The library has no terminal
//! dependencies; the `cli` feature adds the command-line front end.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use sytadel::{
//!     BatchConfig, BatchOrchestrator, BatchProgress, ClientCredentials, MetadataResolver,
//!     NoProgress, Pipeline, SpotifyCatalog, YtDlpFetcher,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> sytadel::Result<()> {
//! let credentials = ClientCredentials::new("client-id", "client-secret")?;
//! let catalog = SpotifyCatalog::new(reqwest::Client::new(), credentials);
//!
//! let config = BatchConfig::default().with_concurrency(4);
//! let fetcher = YtDlpFetcher::new(config.clone());
//! let orchestrator = BatchOrchestrator::new(Arc::new(fetcher), config);
//! let mut pipeline = Pipeline::new(
//!     MetadataResolver::new(Arc::new(catalog)),
//!     orchestrator,
//!     "downloads",
//! );
//!
//! let progress: Arc<dyn BatchProgress> = Arc::new(NoProgress);
//! let report = pipeline
//!     .run(
//!         "https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M",
//!         Path::new("playlist.zip"),
//!         &progress,
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("{} of {} tracks", report.outcome.succeeded(), report.outcome.total());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod archive;
pub mod catalog;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod credentials;
pub mod download;
pub mod error;
pub mod event;
pub mod fetch;
pub mod format;
pub mod fs;
pub mod pipeline;
pub mod resolve;
pub mod state;
pub mod stats;
pub mod url;

// Re-export main types for convenience
pub use archive::ArchivePackager;
pub use catalog::{Catalog, CatalogTrack, ClientCredentials, SpotifyCatalog};
pub use config::{AppConfig, BatchConfig, PathConfig};
pub use credentials::{CredentialStore, FileCredentialStore};
pub use download::{BatchOrchestrator, BatchOutcome, BatchProgress, NoProgress};
pub use error::{Error, Result};
pub use event::{BatchEvent, ChannelProgress};
pub use fetch::{AudioFetcher, FetchResult, YtDlpFetcher};
pub use format::{format_bytes, format_count, format_duration};
pub use fs::{FileSystem, TokioFileSystem};
pub use pipeline::{Pipeline, PipelineReport};
pub use resolve::{MetadataResolver, SearchDescriptor};
pub use state::{BatchJob, BatchState};
pub use stats::{BatchStats, BatchStatsBuilder};
pub use url::{SourceKind, SourceReference};
