//! HTTP adapters for the catalog loader and asset fetcher ports.
//!
//! The catalog endpoint answers with `{"menu": [...]}`, each entry carrying
//! `id`, `nombre`, `precio_base`, `cantidad_disponible`, `descripcion` and
//! `imagen_url`.
//! Relative image references live under the storage path of the same host.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use crate::assets::{AssetFetcher, AssetRef};
use crate::catalog::{CatalogItem, CatalogLoader};
use crate::error::{Error, Result};

/// Default upstream base URL.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Default catalog path, relative to the base URL.
pub const DEFAULT_CATALOG_PATH: &str = "admin/menu/MenuHoy";

/// Default storage path for relative image references.
pub const DEFAULT_STORAGE_PATH: &str = "storage";

/// Default deadline for catalog requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Name used for items the upstream sends without one.
const UNNAMED_ITEM: &str = "Unnamed item";

/// Catalog and asset upstream reached over HTTP.
#[derive(Debug)]
pub struct HttpUpstream {
    http: reqwest::Client,
    catalog_url: Url,
    storage_url: Url,
    timeout: Duration,
    part_seq: AtomicU64,
}

impl HttpUpstream {
    /// Create a new builder.
    pub fn builder() -> HttpUpstreamBuilder {
        HttpUpstreamBuilder::new()
    }

    /// URL the catalog is loaded from.
    pub fn catalog_url(&self) -> &Url {
        &self.catalog_url
    }

    /// Turn an upstream image reference into an asset, dropping junk.
    fn resolve_image(&self, item_id: u64, raw: Option<&str>) -> Option<AssetRef> {
        let raw = raw?.trim();
        if raw.is_empty() || raw == "null" || raw == "undefined" {
            return None;
        }

        let parsed = if raw.starts_with("http") {
            Url::parse(raw)
        } else {
            self.storage_url.join(raw.trim_start_matches('/'))
        };

        match parsed {
            Ok(url) => Some(AssetRef::for_item(item_id, url)),
            Err(e) => {
                warn!(
                    item_id,
                    reference = %raw,
                    error = %e,
                    "Dropping unparsable image reference"
                );
                None
            }
        }
    }

    fn item_from_wire(&self, wire: WireItem) -> CatalogItem {
        let image = self.resolve_image(wire.id, wire.imagen_url.as_deref());
        CatalogItem {
            id: wire.id,
            name: wire
                .nombre
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| UNNAMED_ITEM.to_string()),
            unit_price: wire.precio_base.and_then(|n| n.as_f64()).unwrap_or(0.0),
            available: wire
                .cantidad_disponible
                .and_then(|n| n.as_f64())
                .map(|n| n.clamp(0.0, u32::MAX as f64) as u32)
                .unwrap_or(0),
            description: wire.descripcion.filter(|d| !d.trim().is_empty()),
            image,
        }
    }

    async fn download_to(
        &self,
        asset: &AssetRef,
        partial: &Path,
        timeout: Duration,
    ) -> Result<()> {
        let mut response = self
            .http
            .get(asset.url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(e, &asset.url, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "asset {} returned HTTP {}",
                asset.url,
                status.as_u16()
            )));
        }

        let mut file = tokio::fs::File::create(partial).await?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| request_error(e, &asset.url, timeout))?
        {
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogLoader for HttpUpstream {
    async fn load(&self) -> Result<Vec<CatalogItem>> {
        debug!(url = %self.catalog_url, "Loading catalog from upstream");
        let response = self
            .http
            .get(self.catalog_url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| request_error(e, &self.catalog_url, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "catalog returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("catalog body unreadable: {e}")))?;
        let Some(menu) = body.get("menu").and_then(|m| m.as_array()) else {
            return Err(Error::UpstreamUnavailable(
                "catalog response has no menu array".to_string(),
            ));
        };

        let mut items = Vec::with_capacity(menu.len());
        for raw in menu {
            match WireItem::deserialize(raw) {
                Ok(wire) => items.push(self.item_from_wire(wire)),
                Err(e) => warn!(error = %e, "Skipping malformed catalog item"),
            }
        }

        debug!(items = items.len(), "Catalog loaded");
        Ok(items)
    }
}

#[async_trait]
impl AssetFetcher for HttpUpstream {
    async fn fetch(&self, asset: &AssetRef, target: &Path, timeout: Duration) -> Result<()> {
        let partial = PartialFile::new(target, self.part_seq.fetch_add(1, Ordering::Relaxed));

        // Errors and a dropped future (timeout, supersession) both leave the
        // partial file to the guard.
        self.download_to(asset, partial.path(), timeout).await?;
        tokio::fs::rename(partial.path(), target).await?;
        partial.disarm();
        debug!(url = %asset.url, path = %target.display(), "Asset stored");
        Ok(())
    }
}

/// A `<target>.<seq>.part` file, removed on drop unless disarmed.
///
/// Concurrent downloads of one asset each get their own sequence number.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(target: &Path, seq: u64) -> Self {
        let mut name = target.as_os_str().to_owned();
        name.push(format!(".{seq}.part"));
        Self {
            path: PathBuf::from(name),
            armed: true,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file; it has been renamed into place.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed partial download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove partial download"
            ),
        }
    }
}

fn request_error(err: reqwest::Error, url: &Url, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout {
            what: url.to_string(),
            after: timeout,
        }
    } else {
        Error::UpstreamUnavailable(format!("{url}: {err}"))
    }
}

/// Catalog item as the upstream sends it.
#[derive(Debug, Deserialize)]
struct WireItem {
    id: u64,
    #[serde(default)]
    nombre: Option<String>,
    #[serde(default)]
    precio_base: Option<Numeric>,
    #[serde(default)]
    cantidad_disponible: Option<Numeric>,
    #[serde(default)]
    descripcion: Option<String>,
    #[serde(default)]
    imagen_url: Option<String>,
}

/// Decimal columns arrive either as JSON numbers or as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Numeric::Number(n) => Some(*n),
            Numeric::Text(s) => s.trim().parse().ok(),
        };
        value.filter(|n| n.is_finite())
    }
}

/// Builder for [`HttpUpstream`].
#[derive(Debug)]
pub struct HttpUpstreamBuilder {
    base_url: String,
    catalog_path: String,
    storage_path: String,
    timeout: Duration,
    user_agent: Option<String>,
}

impl HttpUpstreamBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            catalog_path: DEFAULT_CATALOG_PATH.to_string(),
            storage_path: DEFAULT_STORAGE_PATH.to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
        }
    }

    /// Set the upstream base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the catalog path.
    pub fn catalog_path(mut self, path: impl Into<String>) -> Self {
        self.catalog_path = path.into();
        self
    }

    /// Set the storage path for relative image references.
    pub fn storage_path(mut self, path: impl Into<String>) -> Self {
        self.storage_path = path.into();
        self
    }

    /// Set the catalog request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the upstream client.
    pub fn build(self) -> Result<HttpUpstream> {
        let base_url = with_trailing_slash(
            Url::parse(&self.base_url)
                .map_err(|e| Error::Config(format!("base URL {}: {e}", self.base_url)))?,
        );

        let catalog_url = base_url
            .join(self.catalog_path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("catalog path {}: {e}", self.catalog_path)))?;

        let storage_url = with_trailing_slash(
            base_url
                .join(self.storage_path.trim_matches('/'))
                .map_err(|e| Error::Config(format!("storage path {}: {e}", self.storage_path)))?,
        );

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("menuflow/{}", env!("CARGO_PKG_VERSION")));

        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(Error::upstream)?;

        Ok(HttpUpstream {
            http,
            catalog_url,
            storage_url,
            timeout: self.timeout,
            part_seq: AtomicU64::new(0),
        })
    }
}

impl Default for HttpUpstreamBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream() -> HttpUpstream {
        HttpUpstream::builder()
            .base_url("http://127.0.0.1:8000")
            .build()
            .unwrap()
    }

    #[test]
    fn test_urls_are_joined_under_base() {
        let upstream = HttpUpstream::builder()
            .base_url("http://menu.local/api")
            .catalog_path("/admin/menu/MenuHoy")
            .storage_path("/storage/")
            .build()
            .unwrap();
        assert_eq!(
            upstream.catalog_url().as_str(),
            "http://menu.local/api/admin/menu/MenuHoy"
        );
        let image = upstream.resolve_image(3, Some("platos/sopa.jpg")).unwrap();
        assert_eq!(image.url.as_str(), "http://menu.local/api/storage/platos/sopa.jpg");
        assert_eq!(image.file_name, "3_sopa.jpg");
    }

    #[test]
    fn test_partial_file_removed_unless_disarmed() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("1_a.png");

        let abandoned = PartialFile::new(&target, 0);
        std::fs::write(abandoned.path(), b"half").unwrap();
        let abandoned_path = abandoned.path().to_path_buf();
        assert!(abandoned_path.ends_with("1_a.png.0.part"));
        drop(abandoned);
        assert!(!abandoned_path.exists());

        let kept = PartialFile::new(&target, 1);
        std::fs::write(kept.path(), b"whole").unwrap();
        std::fs::rename(kept.path(), &target).unwrap();
        kept.disarm();
        assert!(target.is_file());

        // Never created: dropping is a no-op.
        drop(PartialFile::new(&target, 2));
    }

    #[test]
    fn test_junk_image_references_dropped() {
        let upstream = upstream();
        assert_eq!(upstream.resolve_image(1, None), None);
        assert_eq!(upstream.resolve_image(1, Some("")), None);
        assert_eq!(upstream.resolve_image(1, Some("null")), None);
        assert_eq!(upstream.resolve_image(1, Some("undefined")), None);
        assert_eq!(upstream.resolve_image(1, Some("http://[broken")), None);

        let absolute = upstream
            .resolve_image(1, Some("https://cdn.example.com/x.png"))
            .unwrap();
        assert_eq!(absolute.url.as_str(), "https://cdn.example.com/x.png");
    }

    #[test]
    fn test_wire_item_defaults() {
        let upstream = upstream();
        let wire: WireItem = serde_json::from_value(serde_json::json!({
            "id": 4,
            "precio_base": "85.50",
            "cantidad_disponible": -2,
        }))
        .unwrap();
        let item = upstream.item_from_wire(wire);
        assert_eq!(item.name, UNNAMED_ITEM);
        assert_eq!(item.unit_price, 85.5);
        assert_eq!(item.available, 0);
        assert!(item.is_sold_out());
        assert_eq!(item.image, None);
    }

    /// Path a `PartialFile` for `target` with sequence `seq` would use.
    fn partial_path(target: &Path, seq: u64) -> PathBuf {
        PartialFile::new(target, seq).path().to_path_buf()
    }

    #[test]
    fn test_partial_paths_are_distinct() {
        let target = Path::new("/tmp/assets/1_a.png");
        assert_ne!(partial_path(target, 0), partial_path(target, 1));
        assert_eq!(partial_path(target, 5), PathBuf::from("/tmp/assets/1_a.png.5.part"));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let err = HttpUpstream::builder().base_url("not a url").build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
