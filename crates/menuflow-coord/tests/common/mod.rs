//! Shared fakes for coordinator integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;

use menuflow_coord::{
    AssetFetcher, AssetRef, CatalogItem, CatalogLoader, Error, ExpiryHandler, Result,
};

/// Catalog loader that sleeps, counts calls, and can be switched to fail.
pub struct SlowLoader {
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub failing: AtomicBool,
}

impl SlowLoader {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogLoader for SlowLoader {
    async fn load(&self) -> Result<Vec<CatalogItem>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::upstream("menu API unreachable"));
        }
        Ok(menu(call as u32))
    }
}

/// A small menu whose first item's stock encodes which load produced it.
pub fn menu(load: u32) -> Vec<CatalogItem> {
    vec![
        CatalogItem {
            id: 1,
            name: "Baleada sencilla".to_string(),
            unit_price: 25.0,
            available: load,
            description: None,
            image: Some(asset(1)),
        },
        CatalogItem {
            id: 2,
            name: "Pollo con tajadas".to_string(),
            unit_price: 120.0,
            available: 0,
            description: Some("Con ensalada".to_string()),
            image: None,
        },
    ]
}

pub fn asset(id: u64) -> AssetRef {
    AssetRef::for_item(
        id,
        Url::parse(&format!("http://upstream.test/storage/{id}.jpg")).unwrap(),
    )
}

/// Asset fetcher that records how many fetches overlap.
#[derive(Default)]
pub struct GatedFetcher {
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
    pub order: Mutex<Vec<String>>,
}

impl GatedFetcher {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetFetcher for GatedFetcher {
    async fn fetch(&self, asset: &AssetRef, target: &Path, _timeout: Duration) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.order.lock().push(asset.file_name.clone());

        tokio::time::sleep(self.delay).await;
        let written = std::fs::write(target, asset.url.as_str().as_bytes());

        self.running.fetch_sub(1, Ordering::SeqCst);
        written.map_err(Error::from)
    }
}

/// Expiry handler that remembers who expired.
#[derive(Default)]
pub struct RecordingExpiry {
    pub expired: Mutex<Vec<String>>,
}

impl RecordingExpiry {
    pub fn expired(&self) -> Vec<String> {
        self.expired.lock().clone()
    }
}

#[async_trait]
impl ExpiryHandler for RecordingExpiry {
    async fn on_expire(&self, session: &str) {
        self.expired.lock().push(session.to_string());
    }
}
