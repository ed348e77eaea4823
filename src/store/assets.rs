//! Versioned static-asset caches.

use sha2::{Digest, Sha256};

use crate::error::StoreResult;

/// A cached static-asset response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAsset {
  /// URL the asset was requested with (lookup key)
  pub url: String,
  pub status: u16,
  /// URL the response was finally served from
  pub final_url: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

/// Named caches of static assets, replaced wholesale by version.
pub trait AssetCache: Send + Sync {
  /// Create the named cache if it does not exist yet.
  fn open_cache(&self, name: &str) -> StoreResult<()>;

  fn cache_names(&self) -> StoreResult<Vec<String>>;

  /// Delete a cache and everything in it. Returns whether it existed.
  fn delete_cache(&self, name: &str) -> StoreResult<bool>;

  fn lookup_asset(&self, name: &str, url: &str) -> StoreResult<Option<CachedAsset>>;

  /// Store assets in one transaction, creating the cache if needed.
  fn store_assets(&self, name: &str, assets: &[CachedAsset]) -> StoreResult<()>;
}

/// Stable fixed-length key for a URL.
pub fn url_hash(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}
