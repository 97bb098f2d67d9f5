//! Asset references, the fetcher port, and the local asset directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};

/// A downloadable asset attached to a catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    /// Where to download it from.
    pub url: Url,

    /// File name to store it under, unique per item.
    pub file_name: String,
}

impl AssetRef {
    /// Build a reference for an item, naming the file `<item_id>_<basename>`.
    pub fn for_item(item_id: u64, url: Url) -> Self {
        let basename = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(sanitize)
            .unwrap_or_else(|| "asset".to_string());
        Self {
            file_name: format!("{item_id}_{basename}"),
            url,
        }
    }
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Downloads an asset and stores it durably at `target`.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch `asset` into `target`, giving up after `timeout`.
    ///
    /// On success the complete file exists at `target`. On failure no
    /// partial file is left there.
    async fn fetch(&self, asset: &AssetRef, target: &Path, timeout: Duration) -> Result<()>;
}

/// Directory holding downloaded assets.
#[derive(Debug, Clone)]
pub struct AssetStore {
    dir: PathBuf,
    max_age: Duration,
}

impl AssetStore {
    /// Store files under `dir`, reusing copies younger than `max_age`.
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            dir: dir.into(),
            max_age,
        }
    }

    /// The asset directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where `asset` is stored.
    ///
    /// Rejects file names that would land outside the asset directory.
    pub fn target(&self, asset: &AssetRef) -> Result<PathBuf> {
        let name = asset.file_name.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(Error::InvalidAsset(format!(
                "file name {name:?} for {}",
                asset.url
            )));
        }
        Ok(self.dir.join(name))
    }

    /// Path of an existing copy of `asset` young enough to reuse.
    pub async fn fresh_copy(&self, asset: &AssetRef) -> Option<PathBuf> {
        let path = self.target(asset).ok()?;
        let metadata = tokio::fs::metadata(&path).await.ok()?;
        let age = metadata.modified().ok()?.elapsed().unwrap_or_default();
        if metadata.is_file() && age < self.max_age {
            trace!(path = %path.display(), age_ms = age.as_millis() as u64, "Reusing local asset");
            Some(path)
        } else {
            None
        }
    }

    /// Create the asset directory if needed.
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Delete files in the asset directory older than the reuse window.
    ///
    /// The directory is shared by every session, so anything [`fresh_copy`]
    /// could still hand out is kept. Abandoned `.part` files age out the same
    /// way. Files that cannot be removed are logged and skipped.
    ///
    /// [`fresh_copy`]: AssetStore::fresh_copy
    pub async fn purge_expired(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() || !self.is_expired(&metadata) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove asset"),
            }
        }

        debug!(dir = %self.dir.display(), removed, "Expired assets purged");
        Ok(removed)
    }

    fn is_expired(&self, metadata: &std::fs::Metadata) -> bool {
        metadata
            .modified()
            .map(|modified| modified.elapsed().unwrap_or_default() >= self.max_age)
            .unwrap_or(false)
    }
}
