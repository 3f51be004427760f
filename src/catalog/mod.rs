//! Catalog lookup abstraction.
//!
//! The resolver only needs three read-only queries from a catalog; keeping
//! them behind a trait lets tests substitute an in-memory catalog for the
//! HTTP client.

mod spotify;

use async_trait::async_trait;

use crate::error::Result;

pub use spotify::{ClientCredentials, SpotifyCatalog};

/// A track as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTrack {
    /// Track title.
    pub title: String,
    /// Credited artists, primary artist first.
    pub artists: Vec<String>,
}

impl CatalogTrack {
    /// Creates a track credited to a single artist.
    #[must_use]
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artists: vec![artist.into()],
        }
    }

    /// Returns the primary artist, or an empty string if none is credited.
    #[must_use]
    pub fn primary_artist(&self) -> &str {
        self.artists.first().map_or("", String::as_str)
    }
}

/// Read-only catalog queries.
///
/// Implementations report every failure as
/// [`Error::CatalogUnavailable`](crate::Error::CatalogUnavailable).
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Looks up a single track.
    async fn track(&self, id: &str) -> Result<CatalogTrack>;

    /// Lists the tracks of an album in catalog order.
    async fn album_tracks(&self, id: &str) -> Result<Vec<CatalogTrack>>;

    /// Lists the tracks of a playlist in catalog order.
    async fn playlist_tracks(&self, id: &str) -> Result<Vec<CatalogTrack>>;
}
