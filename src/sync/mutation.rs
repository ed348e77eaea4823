use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{StoreError, StoreResult, SyncError};
use crate::store::{Partition, Record, Seq, StoreKey};

/// Prefix of identifiers handed out for records created while offline.
pub const PLACEHOLDER_PREFIX: &str = "local-";

/// What a queued mutation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MutationKind {
  Create,
  Update,
  Delete,
}

impl MutationKind {
  pub fn as_str(self) -> &'static str {
    match self {
      MutationKind::Create => "create",
      MutationKind::Update => "update",
      MutationKind::Delete => "delete",
    }
  }

  /// Update and delete address an existing record; create does not.
  pub fn needs_target(self) -> bool {
    !matches!(self, MutationKind::Create)
  }

  pub(crate) fn validate_target(self, target: Option<&str>) -> Result<(), SyncError> {
    match (self.needs_target(), target) {
      (false, Some(_)) => Err(SyncError::InvalidTarget {
        kind: self.as_str(),
        problem: "must not name a target",
      }),
      (true, None) => Err(SyncError::InvalidTarget {
        kind: self.as_str(),
        problem: "requires a target identifier",
      }),
      _ => Ok(()),
    }
  }
}

impl fmt::Display for MutationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A pending write in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
  /// Outbox sequence; the record key, not part of the stored value
  #[serde(skip)]
  pub seq: Seq,
  pub kind: MutationKind,
  /// Target entity id. Absent for create.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target: Option<String>,
  /// Payload snapshot taken at enqueue time
  pub payload: Value,
  pub enqueued_at: DateTime<Utc>,
  /// Set only between server confirmation and deletion
  #[serde(default)]
  pub synced: bool,
}

impl QueuedMutation {
  pub fn new(kind: MutationKind, target: Option<String>, payload: Value) -> Self {
    Self {
      seq: 0,
      kind,
      target,
      payload,
      enqueued_at: Utc::now(),
      synced: false,
    }
  }

  /// Identifier later mutations can use to refer to the record this create makes.
  pub fn placeholder_id(&self) -> Option<String> {
    (self.kind == MutationKind::Create).then(|| placeholder_id(self.seq))
  }

  pub(crate) fn from_record(record: Record) -> StoreResult<Self> {
    let seq = match record.key {
      StoreKey::Seq(seq) => seq,
      other => {
        return Err(StoreError::InvalidKey {
          partition: Partition::Outbox.name(),
          key: other.to_string(),
        })
      }
    };
    let mut mutation: QueuedMutation = serde_json::from_value(record.value)?;
    mutation.seq = seq;
    Ok(mutation)
  }

  pub(crate) fn to_value(&self) -> StoreResult<Value> {
    Ok(serde_json::to_value(self)?)
  }
}

pub fn placeholder_id(seq: Seq) -> String {
  format!("{}{}", PLACEHOLDER_PREFIX, seq)
}

pub fn is_placeholder(id: &str) -> bool {
  parse_placeholder(id).is_some()
}

/// Sequence of the create a placeholder was issued for.
pub fn parse_placeholder(id: &str) -> Option<Seq> {
  id.strip_prefix(PLACEHOLDER_PREFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_placeholder_ids() {
    assert_eq!(placeholder_id(7), "local-7");
    assert_eq!(parse_placeholder("local-7"), Some(7));
    assert!(!is_placeholder("17"));
    assert!(!is_placeholder("local-"));
    assert!(!is_placeholder("local-abc"));
  }

  #[test]
  fn test_target_rules() {
    assert!(MutationKind::Create.validate_target(None).is_ok());
    assert!(MutationKind::Create.validate_target(Some("1")).is_err());
    assert!(MutationKind::Update.validate_target(None).is_err());
    assert!(MutationKind::Delete.validate_target(Some("1")).is_ok());
  }

  #[test]
  fn test_record_keeps_seq_outside_value() {
    let mutation = QueuedMutation::new(MutationKind::Update, Some("4".into()), json!({"qty": 2}));
    let value = mutation.to_value().unwrap();
    assert!(value.get("seq").is_none());
    assert_eq!(value["kind"], "UPDATE");

    let back = QueuedMutation::from_record(Record {
      key: StoreKey::Seq(9),
      value,
      stored_at: Utc::now(),
    })
    .unwrap();
    assert_eq!(back.seq, 9);
    assert_eq!(back.target.as_deref(), Some("4"));
    assert!(!back.synced);
  }
}
