//! Spotify Web API catalog using the client-credentials flow.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use super::{Catalog, CatalogTrack};
use crate::error::{Error, Result};

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Tokens this close to expiry are refreshed before use.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Application credentials for the client-credentials flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    /// Creates credentials, rejecting blank values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credentials`] if either value is empty after trimming.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        let client_id = client_id.into().trim().to_string();
        let client_secret = client_secret.into().trim().to_string();
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(Error::Credentials(
                "client id and client secret are both required".to_string(),
            ));
        }
        Ok(Self {
            client_id,
            client_secret,
        })
    }

    fn basic_auth(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw.as_bytes())
        )
    }
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct ApiArtist {
    name: String,
}

#[derive(Deserialize)]
struct ApiTrack {
    name: String,
    #[serde(default)]
    artists: Vec<ApiArtist>,
}

impl From<ApiTrack> for CatalogTrack {
    fn from(track: ApiTrack) -> Self {
        Self {
            title: track.name,
            artists: track.artists.into_iter().map(|a| a.name).collect(),
        }
    }
}

#[derive(Deserialize)]
struct PlaylistItem {
    track: Option<ApiTrack>,
}

#[derive(Deserialize)]
struct Page<T> {
    items: Vec<T>,
    next: Option<String>,
}

/// Catalog backed by the Spotify Web API.
///
/// Construct one per session and share it; the access token is cached and
/// refreshed shortly before it expires.
pub struct SpotifyCatalog {
    http: reqwest::Client,
    credentials: ClientCredentials,
    api_base: String,
    token_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyCatalog {
    /// Creates a catalog client against the public Spotify endpoints.
    #[must_use]
    pub fn new(http: reqwest::Client, credentials: ClientCredentials) -> Self {
        Self::with_endpoints(http, credentials, API_BASE, TOKEN_URL)
    }

    /// Creates a catalog client against custom endpoints.
    #[must_use]
    pub fn with_endpoints(
        http: reqwest::Client,
        credentials: ClientCredentials,
        api_base: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            credentials,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token_url: token_url.into(),
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN
        {
            return Ok(token.access_token.clone());
        }

        log::debug!("Requesting catalog access token");
        let response = self
            .http
            .post(&self.token_url)
            .header("Authorization", self.credentials.basic_auth())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await
            .map_err(|e| Error::CatalogUnavailable(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::CatalogUnavailable(format!(
                "token request rejected ({status}): {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::CatalogUnavailable(format!("malformed token response: {e}")))?;

        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(access_token)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::CatalogUnavailable(format!("request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::CatalogUnavailable(format!(
                "{url} returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::CatalogUnavailable(format!("malformed response from {url}: {e}")))
    }

    /// Fetches every page of a listing, following `next` links.
    async fn get_all_pages<T: DeserializeOwned>(&self, first: String) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next {
            let page: Page<T> = self.get_json(&url).await?;
            items.extend(page.items);
            next = page.next;
        }
        Ok(items)
    }
}

#[async_trait]
impl Catalog for SpotifyCatalog {
    async fn track(&self, id: &str) -> Result<CatalogTrack> {
        let url = format!("{}/tracks/{id}", self.api_base);
        let track: ApiTrack = self.get_json(&url).await?;
        Ok(track.into())
    }

    async fn album_tracks(&self, id: &str) -> Result<Vec<CatalogTrack>> {
        let url = format!("{}/albums/{id}/tracks?limit=50", self.api_base);
        let tracks: Vec<ApiTrack> = self.get_all_pages(url).await?;
        Ok(tracks.into_iter().map(CatalogTrack::from).collect())
    }

    async fn playlist_tracks(&self, id: &str) -> Result<Vec<CatalogTrack>> {
        let url = format!("{}/playlists/{id}/tracks?limit=100", self.api_base);
        let items: Vec<PlaylistItem> = self.get_all_pages(url).await?;
        Ok(playlist_entries(items))
    }
}

/// Drops playlist entries without a track (removed or local items).
fn playlist_entries(items: Vec<PlaylistItem>) -> Vec<CatalogTrack> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(position, item)| {
            if item.track.is_none() {
                log::warn!("Skipping playlist entry {position}: no track data");
            }
            item.track.map(CatalogTrack::from)
        })
        .collect()
}
