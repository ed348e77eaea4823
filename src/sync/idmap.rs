use serde_json::Value;
use std::sync::Arc;

use super::mutation::is_placeholder;
use crate::error::StoreResult;
use crate::store::{LocalStore, Partition, StoreKey};

/// Persistent translation table from local placeholder ids to server ids.
///
/// Entries are written the moment a queued create is confirmed, so a dependent
/// update still finds its target after a crash or a restart.
#[derive(Clone)]
pub struct IdMap {
  store: Arc<dyn LocalStore>,
}

impl IdMap {
  pub fn new(store: Arc<dyn LocalStore>) -> Self {
    Self { store }
  }

  pub fn record(&self, local: &str, server: &str) -> StoreResult<()> {
    self.store.put_all(
      Partition::IdMap,
      &[(StoreKey::from(local), Value::String(server.to_string()))],
    )
  }

  pub fn lookup(&self, local: &str) -> StoreResult<Option<String>> {
    Ok(
      self
        .store
        .get(Partition::IdMap, &StoreKey::from(local))?
        .and_then(|record| record.value.as_str().map(String::from)),
    )
  }

  /// Translate `id` if it is a mapped placeholder; return it unchanged otherwise.
  pub fn resolve(&self, id: &str) -> StoreResult<String> {
    if !is_placeholder(id) {
      return Ok(id.to_string());
    }
    Ok(self.lookup(id)?.unwrap_or_else(|| id.to_string()))
  }
}
