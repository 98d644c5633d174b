//! Video asset provider
//!
//! Resolves an opaque asset reference to a playable handle and duration.
//! Admin requests may name only an asset; the rest of the stream record is
//! filled in from here.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use simulive_core::schedule::PlaybackPolicy;

use crate::store::StoreError;

/// A playable video asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    pub playback_id: String,
    /// Seconds
    pub duration: f64,
    #[serde(default)]
    pub playback_policy: PlaybackPolicy,
}

pub trait AssetProvider: Send + Sync {
    fn resolve(&self, asset_id: &str) -> Option<Asset>;
}

/// Fixed asset catalog
#[derive(Debug, Default)]
pub struct CatalogAssetProvider {
    assets: HashMap<String, Asset>,
}

impl CatalogAssetProvider {
    pub fn new(assets: Vec<Asset>) -> Self {
        Self {
            assets: assets.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| StoreError::Load(format!("{}: {}", path.as_ref().display(), e)))?;
        let assets: Vec<Asset> =
            serde_json::from_str(&content).map_err(|e| StoreError::Load(e.to_string()))?;
        Ok(Self::new(assets))
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl AssetProvider for CatalogAssetProvider {
    fn resolve(&self, asset_id: &str) -> Option<Asset> {
        self.assets.get(asset_id).cloned()
    }
}
