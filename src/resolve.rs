//! Resolves catalog URLs into search descriptors.

use std::fmt;
use std::sync::Arc;

use crate::catalog::{Catalog, CatalogTrack};
use crate::error::Result;
use crate::url::{SourceKind, SourceReference};

/// Title and artist used to search the audio provider for one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchDescriptor {
    pub title: String,
    pub artist: String,
}

impl SearchDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
        }
    }

    /// Returns the provider search query: title followed by artist.
    #[must_use]
    pub fn query(&self) -> String {
        if self.artist.is_empty() {
            return self.title.clone();
        }
        format!("{} {}", self.title, self.artist)
    }
}

impl fmt::Display for SearchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.artist.is_empty() {
            f.write_str(&self.title)
        } else {
            write!(f, "{} - {}", self.artist, self.title)
        }
    }
}

impl From<CatalogTrack> for SearchDescriptor {
    fn from(track: CatalogTrack) -> Self {
        let artist = track.primary_artist().to_string();
        Self {
            title: track.title,
            artist,
        }
    }
}

/// Maps catalog URLs to ordered search descriptors.
#[derive(Clone)]
pub struct MetadataResolver {
    catalog: Arc<dyn Catalog>,
}

impl MetadataResolver {
    /// Creates a resolver over a catalog handle.
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Resolves a URL into its kind and descriptors, in catalog order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReferenceKind`](crate::Error::InvalidReferenceKind)
    /// for unrecognized URLs and
    /// [`Error::CatalogUnavailable`](crate::Error::CatalogUnavailable) if the
    /// lookup fails.
    pub async fn resolve(&self, url: &str) -> Result<(SourceKind, Vec<SearchDescriptor>)> {
        let reference = SourceReference::parse(url)?;
        self.resolve_reference(&reference)
            .await
            .map(|descriptors| (reference.kind(), descriptors))
    }

    /// Resolves an already classified reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CatalogUnavailable`](crate::Error::CatalogUnavailable)
    /// if the lookup fails.
    pub async fn resolve_reference(
        &self,
        reference: &SourceReference,
    ) -> Result<Vec<SearchDescriptor>> {
        let tracks = match reference {
            SourceReference::Track(id) => vec![self.catalog.track(id).await?],
            SourceReference::Album(id) => self.catalog.album_tracks(id).await?,
            SourceReference::Playlist(id) => self.catalog.playlist_tracks(id).await?,
        };
        log::info!(
            "Resolved {} {} to {} track(s)",
            reference.kind(),
            reference.id(),
            tracks.len()
        );
        Ok(tracks.into_iter().map(SearchDescriptor::from).collect())
    }
}
