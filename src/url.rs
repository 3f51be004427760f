//! Catalog URL classification.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Matches the identifier that follows a `track`, `playlist` or `album` marker,
/// in both web form (`/track/<id>`) and URI form (`spotify:track:<id>`).
static ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(track|playlist|album)[/:]([A-Za-z0-9]+)").expect("valid regex")
});

/// The kind of catalog item a URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Track,
    Album,
    Playlist,
}

impl SourceKind {
    /// Returns `true` for references that expand to several tracks.
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(self, Self::Album | Self::Playlist)
    }

    const fn marker(self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Album => "album",
            Self::Playlist => "playlist",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// A classified catalog reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceReference {
    Track(String),
    Album(String),
    Playlist(String),
}

impl SourceReference {
    /// Classifies a catalog URL.
    ///
    /// Markers are tried in the order track, playlist, album; the first one
    /// found anywhere in the input decides the kind. Query strings and
    /// fragments are not part of the id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReferenceKind`] if no marker matches or the
    /// marker is not followed by an id.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let kind = [SourceKind::Track, SourceKind::Playlist, SourceKind::Album]
            .into_iter()
            .find(|kind| url.contains(kind.marker()))
            .ok_or_else(|| Error::InvalidReferenceKind(url.to_string()))?;

        let id = ID_RE
            .captures_iter(url)
            .find(|caps| &caps[1] == kind.marker())
            .map(|caps| caps[2].to_string())
            .ok_or_else(|| Error::InvalidReferenceKind(format!("no {kind} id in {url}")))?;

        Ok(match kind {
            SourceKind::Track => Self::Track(id),
            SourceKind::Album => Self::Album(id),
            SourceKind::Playlist => Self::Playlist(id),
        })
    }

    /// Returns the reference kind.
    #[must_use]
    pub const fn kind(&self) -> SourceKind {
        match self {
            Self::Track(_) => SourceKind::Track,
            Self::Album(_) => SourceKind::Album,
            Self::Playlist(_) => SourceKind::Playlist,
        }
    }

    /// Returns the catalog id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Track(id) | Self::Album(id) | Self::Playlist(id) => id,
        }
    }
}
