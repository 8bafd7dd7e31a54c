//! Network collaborator contract (spec.md §1, "Out of scope: ... HTTP
//! transport details"; SPEC_FULL.md §6.1 expansion).
//!
//! The Sync Engine depends on `RemoteApi` as a trait object, never a
//! concrete HTTP type — this is the seam spec.md's "external
//! collaborators" note describes. `HttpRemoteApi` is the one real
//! implementation, built on the teacher's `reqwest` stack; `MockRemoteApi`
//! drives tests without a network.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::model::{Album, AlbumKind, Asset, AssetKind};

/// One album as reported by the remote, together with the assets that
/// belong to it (empty for `folder`-kind albums). The Sync Engine flattens
/// these into a `RemoteState` (spec.md §4.3, "fetch").
#[derive(Debug, Clone)]
pub struct RemoteAlbumListing {
    pub album: Album,
    pub assets: Vec<Asset>,
}

/// The engine's view of "the network": listing remote albums (with asset
/// membership) and streaming an asset's bytes. MFA capture, the login
/// handshake, and token refresh are out of scope (spec.md §1) —
/// implementations take an already-valid trust token.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_albums(&self) -> Result<Vec<RemoteAlbumListing>>;

    async fn stream_asset(
        &self,
        asset: &Asset,
    ) -> Result<Pin<Box<dyn AsyncRead + Send + Unpin>>>;
}

// ---- HTTP implementation -----------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteAlbumDto {
    uuid: String,
    kind: RemoteAlbumKindDto,
    display_name: String,
    #[serde(default)]
    parent_uuid: String,
    #[serde(default)]
    assets: Vec<RemoteAssetDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RemoteAlbumKindDto {
    Folder,
    Album,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteAssetDto {
    uuid: String,
    filename_stem: String,
    extension: String,
    size_bytes: u64,
    content_hash: String,
    modified_time: DateTime<Utc>,
    kind: RemoteAssetKindDto,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RemoteAssetKindDto {
    Original,
    Edited,
    LivePhotoVideo,
}

impl From<RemoteAssetKindDto> for AssetKind {
    fn from(dto: RemoteAssetKindDto) -> Self {
        match dto {
            RemoteAssetKindDto::Original => AssetKind::Original,
            RemoteAssetKindDto::Edited => AssetKind::Edited,
            RemoteAssetKindDto::LivePhotoVideo => AssetKind::LivePhotoVideo,
        }
    }
}

impl From<RemoteAssetDto> for Asset {
    fn from(dto: RemoteAssetDto) -> Self {
        Asset {
            uuid: dto.uuid,
            filename_stem: dto.filename_stem,
            extension: dto.extension,
            size_bytes: dto.size_bytes,
            content_hash: dto.content_hash,
            modified_time: dto.modified_time,
            kind: dto.kind.into(),
        }
    }
}

fn dto_into_listing(dto: RemoteAlbumDto) -> RemoteAlbumListing {
    let kind = match dto.kind {
        RemoteAlbumKindDto::Folder => AlbumKind::Folder,
        RemoteAlbumKindDto::Album => AlbumKind::Album,
    };
    let mut album = Album::new(dto.uuid, kind, dto.display_name, dto.parent_uuid);
    let assets: Vec<Asset> = dto.assets.into_iter().map(Asset::from).collect();
    if kind == AlbumKind::Album {
        for asset in &assets {
            album.assets.insert(asset.uuid.clone(), asset.file_name());
        }
    }
    RemoteAlbumListing { album, assets }
}

/// Minimal REST-shaped remote client: list albums (owned + shared, merged
/// and deduplicated by uuid — the teacher's `ImmichClient::get_albums`
/// pattern), and stream an asset's original bytes. Authenticates via a
/// bearer trust token; does not implement the login flow.
pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: String,
    trust_token: String,
}

impl HttpRemoteApi {
    pub fn new(base_url: impl Into<String>, trust_token: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("failed to build the HTTP client");
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            trust_token,
        }
    }

    fn authed_get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header("Authorization", format!("Bearer {}", self.trust_token))
    }

    async fn fetch_albums_at(&self, suffix: &str) -> Result<Vec<RemoteAlbumDto>> {
        let url = format!("{}/api/albums{suffix}", self.base_url);
        debug!("fetching albums from {url}");
        let response = self.authed_get(&url).send().await.map_err(|e| {
            EngineError::DownloadFailed {
                uuid: "albums-listing".to_string(),
                source: e.into(),
            }
        })?;
        let response = response.error_for_status().map_err(|e| EngineError::DownloadFailed {
            uuid: "albums-listing".to_string(),
            source: e.into(),
        })?;
        response
            .json()
            .await
            .map_err(|e| EngineError::DownloadFailed {
                uuid: "albums-listing".to_string(),
                source: e.into(),
            })
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn list_albums(&self) -> Result<Vec<RemoteAlbumListing>> {
        let owned = self.fetch_albums_at("").await?;
        let shared = self.fetch_albums_at("?shared=true").await?;

        let mut seen = std::collections::HashSet::new();
        let mut listings = Vec::new();
        for dto in owned.into_iter().chain(shared) {
            if seen.insert(dto.uuid.clone()) {
                listings.push(dto_into_listing(dto));
            }
        }
        Ok(listings)
    }

    async fn stream_asset(
        &self,
        asset: &Asset,
    ) -> Result<Pin<Box<dyn AsyncRead + Send + Unpin>>> {
        let url = format!("{}/api/assets/{}/original", self.base_url, asset.uuid);
        let response = self.authed_get(&url).send().await.map_err(|e| {
            EngineError::DownloadFailed {
                uuid: asset.uuid.clone(),
                source: e.into(),
            }
        })?;
        let response = response.error_for_status().map_err(|e| EngineError::DownloadFailed {
            uuid: asset.uuid.clone(),
            source: e.into(),
        })?;

        let byte_stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        let reader = tokio_util::io::StreamReader::new(byte_stream);
        Ok(Box::pin(reader))
    }
}

// ---- test double ---------------------------------------------------------

/// Drives the Sync Engine and Differ in tests without a network
/// (SPEC_FULL.md §6.1).
pub struct MockRemoteApi {
    listings: Vec<RemoteAlbumListing>,
    bytes_by_uuid: std::collections::HashMap<String, Vec<u8>>,
}

impl MockRemoteApi {
    pub fn empty() -> Self {
        Self {
            listings: Vec::new(),
            bytes_by_uuid: std::collections::HashMap::new(),
        }
    }

    pub fn new(listings: Vec<RemoteAlbumListing>, bytes_by_uuid: std::collections::HashMap<String, Vec<u8>>) -> Self {
        Self { listings, bytes_by_uuid }
    }
}

#[async_trait]
impl RemoteApi for MockRemoteApi {
    async fn list_albums(&self) -> Result<Vec<RemoteAlbumListing>> {
        Ok(self.listings.clone())
    }

    async fn stream_asset(
        &self,
        asset: &Asset,
    ) -> Result<Pin<Box<dyn AsyncRead + Send + Unpin>>> {
        let bytes = self
            .bytes_by_uuid
            .get(&asset.uuid)
            .cloned()
            .ok_or_else(|| EngineError::DownloadFailed {
                uuid: asset.uuid.clone(),
                source: anyhow::anyhow!("no fixture bytes registered for this asset"),
            })?;
        Ok(Box::pin(std::io::Cursor::new(bytes)))
    }
}
