//! Read-through entity cache on top of the local store.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::traits::{CacheResult, CachedEntity};
use crate::api::entity_id;
use crate::error::{ApiError, StoreResult};
use crate::store::{LocalStore, Partition, Record, StoreKey};

/// Entity cache that manages the `entities` partition.
///
/// Reads go network-first; a successful fetch overwrites the cached copies
/// wholesale, and an offline failure falls back to whatever was cached last.
pub struct EntityCache {
  store: Arc<dyn LocalStore>,
  /// Payload field holding the server id
  identifier_field: String,
}

impl EntityCache {
  pub fn new(store: Arc<dyn LocalStore>, identifier_field: impl Into<String>) -> Self {
    Self {
      store,
      identifier_field: identifier_field.into(),
    }
  }

  pub fn identifier_field(&self) -> &str {
    &self.identifier_field
  }

  /// Fetch a list network-first.
  ///
  /// 1. Try the network; on success store every entity and return the fresh list
  /// 2. On an offline failure, return the cached entities instead
  /// 3. Any other failure propagates unchanged
  pub async fn fetch_all<F, Fut>(&self, fetcher: F) -> Result<CacheResult<Vec<Value>>, ApiError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Value>, ApiError>>,
  {
    match fetcher().await {
      Ok(entities) => {
        let records: Vec<(StoreKey, Value)> = entities
          .iter()
          .filter_map(|entity| {
            entity_id(entity, &self.identifier_field).map(|id| (StoreKey::Id(id), entity.clone()))
          })
          .collect();
        if let Err(e) = self.store.put_all(Partition::Entities, &records) {
          warn!(error = %e, "could not refresh entity cache");
        }
        Ok(CacheResult::from_network(entities))
      }
      Err(err) if err.is_offline() => {
        debug!("offline, serving cached entities");
        let cached = self.all().unwrap_or_else(|e| {
          warn!(error = %e, "entity cache unavailable");
          Vec::new()
        });
        let newest = cached.iter().map(|e| e.synced_at).max();
        Ok(CacheResult::offline(
          cached.into_iter().map(|e| e.payload).collect(),
          newest,
        ))
      }
      Err(err) => Err(err),
    }
  }

  /// Fetch a single entity network-first, falling back to the cached copy offline.
  pub async fn fetch_one<F, Fut>(&self, id: &str, fetcher: F) -> Result<CacheResult<Value>, ApiError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, ApiError>>,
  {
    match fetcher().await {
      Ok(entity) => {
        if let Err(e) = self.put_with_id(id, &entity) {
          warn!(error = %e, id, "could not refresh cached entity");
        }
        Ok(CacheResult::from_network(entity))
      }
      Err(err) if err.is_offline() => match self.get(id) {
        Ok(Some(cached)) => Ok(CacheResult::offline(cached.payload, Some(cached.synced_at))),
        Ok(None) => Err(err),
        Err(e) => {
          warn!(error = %e, id, "entity cache unavailable");
          Err(err)
        }
      },
      Err(err) => Err(err),
    }
  }

  /// Overwrite an entity keyed by its own identifier field.
  ///
  /// Entities without an identifier are skipped and reported as `false`.
  pub fn put(&self, entity: &Value) -> StoreResult<bool> {
    match entity_id(entity, &self.identifier_field) {
      Some(id) => self.put_with_id(&id, entity).map(|_| true),
      None => Ok(false),
    }
  }

  pub fn put_with_id(&self, id: &str, entity: &Value) -> StoreResult<()> {
    self
      .store
      .put_all(Partition::Entities, &[(StoreKey::from(id), entity.clone())])
  }

  pub fn remove(&self, id: &str) -> StoreResult<()> {
    self.store.delete(Partition::Entities, &StoreKey::from(id))
  }

  pub fn get(&self, id: &str) -> StoreResult<Option<CachedEntity>> {
    Ok(
      self
        .store
        .get(Partition::Entities, &StoreKey::from(id))?
        .map(to_entity),
    )
  }

  pub fn all(&self) -> StoreResult<Vec<CachedEntity>> {
    Ok(
      self
        .store
        .list_all(Partition::Entities)?
        .into_iter()
        .map(to_entity)
        .collect(),
    )
  }
}

impl Clone for EntityCache {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      identifier_field: self.identifier_field.clone(),
    }
  }
}

fn to_entity(record: Record) -> CachedEntity {
  CachedEntity {
    id: record.key.to_string(),
    payload: record.value,
    synced_at: record.stored_at,
  }
}
