use serde_json::Value;
use std::sync::Arc;

use super::mutation::{MutationKind, QueuedMutation};
use crate::error::StoreResult;
use crate::store::{LocalStore, Partition, Seq, StoreKey};

/// Typed view of the `outbox` partition.
#[derive(Clone)]
pub struct Outbox {
  store: Arc<dyn LocalStore>,
}

impl Outbox {
  pub fn new(store: Arc<dyn LocalStore>) -> Self {
    Self { store }
  }

  pub fn append(
    &self,
    kind: MutationKind,
    target: Option<String>,
    payload: Value,
  ) -> StoreResult<QueuedMutation> {
    let mut mutation = QueuedMutation::new(kind, target, payload);
    mutation.seq = self.store.append(Partition::Outbox, &mutation.to_value()?)?;
    Ok(mutation)
  }

  /// Every queued mutation in sequence order.
  pub fn list(&self) -> StoreResult<Vec<QueuedMutation>> {
    self
      .store
      .list_all(Partition::Outbox)?
      .into_iter()
      .map(QueuedMutation::from_record)
      .collect()
  }

  pub fn get(&self, seq: Seq) -> StoreResult<Option<QueuedMutation>> {
    self
      .store
      .get(Partition::Outbox, &StoreKey::Seq(seq))?
      .map(QueuedMutation::from_record)
      .transpose()
  }

  pub fn remove(&self, seq: Seq) -> StoreResult<()> {
    self.store.delete(Partition::Outbox, &StoreKey::Seq(seq))
  }

  pub fn len(&self) -> StoreResult<usize> {
    self.store.count(Partition::Outbox)
  }

  pub fn is_empty(&self) -> StoreResult<bool> {
    Ok(self.len()? == 0)
  }
}
