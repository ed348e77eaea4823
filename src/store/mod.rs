//! Persistent local store.
//!
//! A small transactional key-value layer over SQLite with three logical partitions:
//! - `entities`: read-through cache of server-known records, keyed by server id
//! - `outbox`: pending mutations, keyed by a strictly increasing sequence
//! - `id_map`: local placeholder id to server id, filled while draining
//!
//! Every operation is atomic at the single-call level. Any failure of the underlying
//! medium is reported as [`StoreError::Unavailable`], which callers treat as non-fatal.

mod assets;
mod sqlite;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

use crate::error::StoreResult;

pub use assets::{url_hash, AssetCache, CachedAsset};
pub use sqlite::SqliteStore;

/// Outbox sequence number.
pub type Seq = i64;

/// Logical partition of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
  Entities,
  Outbox,
  IdMap,
}

impl Partition {
  pub fn name(self) -> &'static str {
    match self {
      Partition::Entities => "entities",
      Partition::Outbox => "outbox",
      Partition::IdMap => "id_map",
    }
  }

  /// Whether keys in this partition are generated sequence numbers.
  pub fn is_sequenced(self) -> bool {
    matches!(self, Partition::Outbox)
  }
}

impl fmt::Display for Partition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Key of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreKey {
  Id(String),
  Seq(Seq),
}

impl fmt::Display for StoreKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StoreKey::Id(id) => f.write_str(id),
      StoreKey::Seq(seq) => write!(f, "#{}", seq),
    }
  }
}

impl From<&str> for StoreKey {
  fn from(id: &str) -> Self {
    StoreKey::Id(id.to_string())
  }
}

impl From<String> for StoreKey {
  fn from(id: String) -> Self {
    StoreKey::Id(id)
  }
}

impl From<Seq> for StoreKey {
  fn from(seq: Seq) -> Self {
    StoreKey::Seq(seq)
  }
}

/// A record read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
  pub key: StoreKey,
  pub value: Value,
  /// When the record was last written
  pub stored_at: DateTime<Utc>,
}

/// Storage backend for the partitioned store.
///
/// Handles are shared (`Arc<dyn LocalStore>`) between the read path and the drain loop,
/// so implementations must make each call atomic on its own.
pub trait LocalStore: Send + Sync {
  /// Get a single record. `None` means not found.
  fn get(&self, partition: Partition, key: &StoreKey) -> StoreResult<Option<Record>>;

  /// Upsert many records. Either all of them become visible or none do.
  fn put_all(&self, partition: Partition, records: &[(StoreKey, Value)]) -> StoreResult<()>;

  /// Append to a sequenced partition, returning the generated key.
  fn append(&self, partition: Partition, value: &Value) -> StoreResult<Seq>;

  fn delete(&self, partition: Partition, key: &StoreKey) -> StoreResult<()>;

  /// All records. Ascending sequence order for the outbox, unspecified otherwise.
  fn list_all(&self, partition: Partition) -> StoreResult<Vec<Record>>;

  /// Number of records, without reading them.
  fn count(&self, partition: Partition) -> StoreResult<usize>;

  fn clear(&self, partition: Partition) -> StoreResult<()>;
}
