//! Error types for the sytadel library.

use thiserror::Error;

/// Errors that can occur while resolving, downloading or packaging a batch.
///
/// Individual fetch failures are not represented here; they are reported as
/// [`FetchResult::Failed`](crate::fetch::FetchResult::Failed) and counted by
/// the orchestrator instead of aborting the batch.
#[derive(Error, Debug)]
pub enum Error {
    /// The input URL is not a track, album or playlist reference.
    #[error("Invalid reference: {0}")]
    InvalidReferenceKind(String),

    /// The catalog lookup failed (auth, network, rate limit, bad response).
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// The batch cannot start with the given input.
    #[error("Invalid batch input: {0}")]
    InvalidBatchInput(String),

    /// Writing the output archive failed.
    #[error("Packaging failed: {0}")]
    Packaging(String),

    /// The credential record cannot be stored or read.
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// The configuration file is malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A specialized `Result` type for sytadel operations.
pub type Result<T> = std::result::Result<T, Error>;
