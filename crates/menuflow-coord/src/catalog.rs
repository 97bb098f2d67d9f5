//! Catalog types and the upstream loader port.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::assets::AssetRef;
use crate::error::Result;

/// One orderable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Upstream identifier.
    pub id: u64,

    /// Display name.
    pub name: String,

    /// Price of one unit.
    pub unit_price: f64,

    /// Units left today.
    pub available: u32,

    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Image to show alongside the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<AssetRef>,
}

impl CatalogItem {
    /// Whether nothing is left to order.
    pub fn is_sold_out(&self) -> bool {
        self.available == 0
    }
}

/// Loads the current catalog from upstream.
///
/// Called at most once per TTL window no matter how many sessions ask.
#[async_trait]
pub trait CatalogLoader: Send + Sync {
    /// Fetch every item currently on offer.
    async fn load(&self) -> Result<Vec<CatalogItem>>;
}

/// What to return when the catalog cannot be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CatalogFallback {
    /// Propagate the failure.
    Fail,
    /// Serve the last good catalog, marked stale.
    #[default]
    LastGood,
    /// Serve an empty catalog, marked empty.
    Empty,
}

/// How a returned catalog was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within its TTL.
    Fresh,
    /// Last good copy served after a failed load.
    Stale {
        /// Time since that copy was loaded.
        age: Duration,
    },
    /// Nothing could be loaded; the caller asked for an empty catalog.
    Empty,
}

/// A catalog snapshot owned by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    /// Items on offer.
    pub items: Vec<CatalogItem>,

    /// How the items were obtained.
    pub freshness: Freshness,
}

impl Catalog {
    /// An empty catalog standing in for a failed load.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            freshness: Freshness::Empty,
        }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether there is nothing on offer.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up an item by its upstream id.
    pub fn get(&self, id: u64) -> Option<&CatalogItem> {
        self.items.iter().find(|item| item.id == id)
    }
}
