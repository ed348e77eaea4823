use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::idmap::IdMap;
use super::mutation::{is_placeholder, parse_placeholder, placeholder_id, MutationKind, QueuedMutation};
use super::outbox::Outbox;
use crate::api::{entity_id, RemoteApi};
use crate::cache::EntityCache;
use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncError;
use crate::event::{EventSender, SyncEvent};
use crate::store::{LocalStore, Seq};

/// Result of submitting a change.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
  /// The server accepted the change; carries its confirmed entity.
  Confirmed(Value),
  /// The change is waiting in the outbox.
  Queued(QueuedMutation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainHalt {
  pub seq: Seq,
  pub kind: MutationKind,
  /// Whether the failure was the server being unreachable
  pub offline: bool,
  pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub confirmed: usize,
  /// Items already marked synced that were removed without replay
  pub purged: usize,
  pub remaining: usize,
  pub halted: Option<DrainHalt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
  Completed(DrainReport),
  /// Another drain was in progress; nothing was done.
  AlreadyRunning,
}

/// Releases the drain flag when a drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Durable FIFO of writes made while the server was unreachable.
///
/// Mutations are replayed strictly in enqueue order. A drain stops at the
/// first failure and leaves that item and everything after it untouched, so a
/// later drain picks up exactly where this one stopped.
pub struct MutationQueue {
  api: Arc<dyn RemoteApi>,
  outbox: Outbox,
  ids: IdMap,
  entities: EntityCache,
  connectivity: ConnectivityMonitor,
  events: Option<EventSender>,
  draining: AtomicBool,
  submitting: Mutex<Option<Seq>>,
  queued: Notify,
}

impl MutationQueue {
  pub fn new(
    store: Arc<dyn LocalStore>,
    api: Arc<dyn RemoteApi>,
    entities: EntityCache,
    connectivity: ConnectivityMonitor,
  ) -> Self {
    Self {
      api,
      outbox: Outbox::new(store.clone()),
      ids: IdMap::new(store),
      entities,
      connectivity,
      events: None,
      draining: AtomicBool::new(false),
      submitting: Mutex::new(None),
      queued: Notify::new(),
    }
  }

  pub fn with_events(mut self, events: EventSender) -> Self {
    self.events = Some(events);
    self
  }

  /// Send a change to the server, or queue it when that is not possible.
  ///
  /// A change goes straight to the server only when the monitor reports online
  /// and nothing is already queued; otherwise it lines up behind the earlier
  /// changes. A direct attempt that finds the server unreachable is queued too.
  /// Application errors are returned to the caller and nothing is queued.
  pub async fn submit(
    &self,
    kind: MutationKind,
    target: Option<&str>,
    payload: Value,
  ) -> Result<SubmitOutcome, SyncError> {
    kind.validate_target(target)?;

    if !self.connectivity.is_online() {
      debug!(%kind, "offline, queuing mutation");
      return self.enqueue(kind, target, payload).map(SubmitOutcome::Queued);
    }
    if !self.outbox.is_empty()? {
      debug!(%kind, "outbox not empty, queuing behind earlier changes");
      return self.enqueue(kind, target, payload).map(SubmitOutcome::Queued);
    }

    let resolved = match target {
      Some(id) => {
        let resolved = self.ids.resolve(id)?;
        if is_placeholder(&resolved) {
          return Err(SyncError::UnresolvedPlaceholder(id.to_string()));
        }
        Some(resolved)
      }
      None => None,
    };

    match self.apply(kind, resolved.as_deref(), &payload).await {
      Ok(confirmed) => Ok(SubmitOutcome::Confirmed(confirmed)),
      Err(err) if err.is_offline() => {
        info!(%kind, error = %err, "server unreachable, queuing mutation");
        self.enqueue(kind, target, payload).map(SubmitOutcome::Queued)
      }
      Err(err) => Err(err),
    }
  }

  /// Append a change to the outbox without contacting the server.
  ///
  /// The payload is stored as given. Cached entities are not touched; they
  /// change only once the server confirms.
  pub fn enqueue(
    &self,
    kind: MutationKind,
    target: Option<&str>,
    payload: Value,
  ) -> Result<QueuedMutation, SyncError> {
    kind.validate_target(target)?;
    if let Some(id) = target {
      if is_placeholder(id) && !self.placeholder_known(id)? {
        return Err(SyncError::UnresolvedPlaceholder(id.to_string()));
      }
    }

    let mutation = self
      .outbox
      .append(kind, target.map(String::from), payload)?;
    info!(seq = mutation.seq, %kind, target = ?mutation.target, "queued mutation");
    self.emit(SyncEvent::Queued {
      seq: mutation.seq,
      kind,
    });
    self.queued.notify_one();
    Ok(mutation)
  }

  /// Resolves once something was queued since the last call returned.
  ///
  /// A notification sent while nobody waits is kept, so changes queued during
  /// a drain still wake the next wait.
  pub async fn wait_queued(&self) {
    self.queued.notified().await;
  }

  /// Replay the outbox in order until it is empty or an item fails.
  ///
  /// Only one drain runs at a time; a concurrent call returns
  /// `DrainOutcome::AlreadyRunning` immediately.
  pub async fn drain(&self) -> Result<DrainOutcome, SyncError> {
    let Some(_guard) = DrainGuard::acquire(&self.draining) else {
      debug!("drain already in progress");
      return Ok(DrainOutcome::AlreadyRunning);
    };

    let items = self.outbox.list()?;
    let mut report = DrainReport::default();
    if items.is_empty() {
      return Ok(DrainOutcome::Completed(report));
    }
    info!(count = items.len(), "draining outbox");

    for item in items {
      if item.synced {
        self.outbox.remove(item.seq)?;
        report.purged += 1;
        continue;
      }
      if !self.begin_submitting(item.seq)? {
        debug!(seq = item.seq, "mutation removed before replay, skipping");
        continue;
      }
      let result = self.replay(&item).await;
      self.end_submitting();

      match result {
        Ok(()) => {
          report.confirmed += 1;
          debug!(seq = item.seq, kind = %item.kind, "mutation confirmed");
        }
        Err(err) => {
          warn!(seq = item.seq, kind = %item.kind, error = %err, "replay failed, halting drain");
          report.halted = Some(DrainHalt {
            seq: item.seq,
            kind: item.kind,
            offline: err.is_offline(),
            error: err.to_string(),
          });
          break;
        }
      }
    }

    report.remaining = self.outbox.len()?;
    info!(
      confirmed = report.confirmed,
      remaining = report.remaining,
      halted = report.halted.is_some(),
      "drain finished"
    );
    self.emit(SyncEvent::Drained(report.clone()));
    Ok(DrainOutcome::Completed(report))
  }

  /// Discard a queued change the user no longer wants.
  ///
  /// Refused while that exact item is being submitted, and for a create whose
  /// placeholder is still the target of later queued changes.
  pub fn remove_pending(&self, seq: Seq) -> Result<QueuedMutation, SyncError> {
    let submitting = self.lock_submitting();
    if *submitting == Some(seq) {
      return Err(SyncError::Submitting(seq));
    }
    let item = self.outbox.get(seq)?.ok_or(SyncError::NotFound(seq))?;
    if item.kind == MutationKind::Create {
      let dependents = self.dependents_of(seq)?;
      if !dependents.is_empty() {
        return Err(SyncError::HasDependents { seq, dependents });
      }
    }
    self.outbox.remove(seq)?;
    drop(submitting);

    info!(seq, kind = %item.kind, "discarded queued mutation");
    self.emit(SyncEvent::Discarded { seq });
    Ok(item)
  }

  pub fn pending(&self) -> Result<Vec<QueuedMutation>, SyncError> {
    Ok(self.outbox.list()?)
  }

  pub fn pending_count(&self) -> Result<usize, SyncError> {
    Ok(self.outbox.len()?)
  }

  pub fn is_draining(&self) -> bool {
    self.draining.load(Ordering::Acquire)
  }

  pub fn entities(&self) -> &EntityCache {
    &self.entities
  }

  async fn replay(&self, item: &QueuedMutation) -> Result<(), SyncError> {
    let target = match &item.target {
      Some(id) => {
        let resolved = self.ids.resolve(id)?;
        if is_placeholder(&resolved) {
          return Err(SyncError::UnresolvedPlaceholder(id.clone()));
        }
        Some(resolved)
      }
      None => None,
    };

    let confirmed = self.apply(item.kind, target.as_deref(), &item.payload).await?;

    if item.kind == MutationKind::Create {
      match entity_id(&confirmed, self.entities.identifier_field()) {
        Some(server_id) => {
          let local = placeholder_id(item.seq);
          self.ids.record(&local, &server_id)?;
          debug!(%local, %server_id, "mapped placeholder to server id");
        }
        None => warn!(seq = item.seq, "server returned no identifier for created entity"),
      }
    }

    self.outbox.remove(item.seq)?;
    Ok(())
  }

  /// Perform one change against the server and fold the answer into the entity cache.
  async fn apply(
    &self,
    kind: MutationKind,
    target: Option<&str>,
    payload: &Value,
  ) -> Result<Value, SyncError> {
    let field = self.entities.identifier_field();
    match (kind, target) {
      (MutationKind::Create, _) => {
        let created = self.api.create(&without_field(payload, field)).await?;
        if let Err(err) = self.entities.put(&created) {
          warn!(error = %err, "failed to cache created entity");
        }
        Ok(created)
      }
      (MutationKind::Update, Some(id)) => {
        let body = with_field(payload, field, id);
        let echoed = self.api.update(id, &body).await?;
        let confirmed = if echoed.is_object() { echoed } else { body };
        if let Err(err) = self.entities.put_with_id(id, &confirmed) {
          warn!(id, error = %err, "failed to cache updated entity");
        }
        Ok(confirmed)
      }
      (MutationKind::Delete, Some(id)) => {
        self.api.delete(id).await?;
        if let Err(err) = self.entities.remove(id) {
          warn!(id, error = %err, "failed to drop deleted entity from cache");
        }
        Ok(Value::Null)
      }
      (kind, None) => Err(SyncError::InvalidTarget {
        kind: kind.as_str(),
        problem: "requires a target identifier",
      }),
    }
  }

  /// A placeholder is usable if it is already mapped or its create is still queued.
  fn placeholder_known(&self, id: &str) -> Result<bool, SyncError> {
    if self.ids.lookup(id)?.is_some() {
      return Ok(true);
    }
    let Some(seq) = parse_placeholder(id) else {
      return Ok(false);
    };
    Ok(matches!(
      self.outbox.get(seq)?,
      Some(item) if item.kind == MutationKind::Create
    ))
  }

  /// Queued changes that still address the placeholder of create `seq`.
  fn dependents_of(&self, seq: Seq) -> Result<Vec<Seq>, SyncError> {
    let local = placeholder_id(seq);
    if self.ids.lookup(&local)?.is_some() {
      return Ok(Vec::new());
    }
    Ok(
      self
        .outbox
        .list()?
        .into_iter()
        .filter(|item| item.target.as_deref() == Some(local.as_str()))
        .map(|item| item.seq)
        .collect(),
    )
  }

  // The slot holds a plain Option, so a panic elsewhere cannot leave it torn.
  fn lock_submitting(&self) -> MutexGuard<'_, Option<Seq>> {
    self
      .submitting
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Mark `seq` in flight, unless it was removed in the meantime.
  fn begin_submitting(&self, seq: Seq) -> Result<bool, SyncError> {
    let mut submitting = self.lock_submitting();
    if self.outbox.get(seq)?.is_none() {
      return Ok(false);
    }
    *submitting = Some(seq);
    Ok(true)
  }

  fn end_submitting(&self) {
    *self.lock_submitting() = None;
  }

  fn emit(&self, event: SyncEvent) {
    if let Some(events) = &self.events {
      let _ = events.send(event);
    }
  }
}

fn without_field(payload: &Value, field: &str) -> Value {
  let mut body = payload.clone();
  if let Some(obj) = body.as_object_mut() {
    obj.remove(field);
  }
  body
}

/// Point the payload's identifier at `id`, keeping numeric ids numeric.
fn with_field(payload: &Value, field: &str, id: &str) -> Value {
  let id_value = id
    .parse::<i64>()
    .map(Value::from)
    .unwrap_or_else(|_| Value::String(id.to_string()));
  match payload {
    Value::Object(obj) => {
      let mut body = obj.clone();
      if body.contains_key(field) {
        body.insert(field.to_string(), id_value);
      }
      Value::Object(body)
    }
    Value::Null => {
      let mut body = Map::new();
      body.insert(field.to_string(), id_value);
      Value::Object(body)
    }
    other => other.clone(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::connectivity::Connectivity;
  use crate::store::SqliteStore;
  use crate::testing::{ApiCall, FakeApi};
  use serde_json::json;
  use std::time::Duration;

  struct Harness {
    store: Arc<SqliteStore>,
    api: Arc<FakeApi>,
    monitor: ConnectivityMonitor,
    queue: MutationQueue,
  }

  fn harness(state: Connectivity) -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let api = Arc::new(FakeApi::new());
    let monitor = ConnectivityMonitor::new(state);
    let queue = queue_over(store.clone(), api.clone(), monitor.clone());
    Harness {
      store,
      api,
      monitor,
      queue,
    }
  }

  fn queue_over(
    store: Arc<SqliteStore>,
    api: Arc<FakeApi>,
    monitor: ConnectivityMonitor,
  ) -> MutationQueue {
    let entities = EntityCache::new(store.clone(), "id");
    MutationQueue::new(store, api, entities, monitor)
  }

  fn completed(outcome: DrainOutcome) -> DrainReport {
    match outcome {
      DrainOutcome::Completed(report) => report,
      DrainOutcome::AlreadyRunning => panic!("expected a completed drain"),
    }
  }

  #[tokio::test]
  async fn test_offline_submit_queues_without_touching_entities() {
    let h = harness(Connectivity::Offline);

    let outcome = h
      .queue
      .submit(MutationKind::Create, None, json!({"title": "Chairs"}))
      .await
      .unwrap();

    assert!(matches!(outcome, SubmitOutcome::Queued(ref m) if m.seq >= 1));
    assert_eq!(h.api.attempts(), 0);
    assert_eq!(h.queue.pending_count().unwrap(), 1);
    assert!(h.queue.entities().all().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_online_submit_goes_direct() {
    let h = harness(Connectivity::Online);

    let outcome = h
      .queue
      .submit(MutationKind::Create, None, json!({"title": "Desks"}))
      .await
      .unwrap();

    match outcome {
      SubmitOutcome::Confirmed(entity) => assert_eq!(entity["id"], 100),
      other => panic!("expected confirmation, got {:?}", other),
    }
    assert_eq!(h.queue.pending_count().unwrap(), 0);
    assert!(h.queue.entities().get("100").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_submit_queues_when_server_unreachable() {
    let h = harness(Connectivity::Online);
    h.api.set_online(false);

    let outcome = h
      .queue
      .submit(MutationKind::Update, Some("7"), json!({"id": 7, "qty": 3}))
      .await
      .unwrap();

    assert!(matches!(outcome, SubmitOutcome::Queued(_)));
    assert_eq!(h.queue.pending_count().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_application_error_is_not_queued() {
    let h = harness(Connectivity::Online);
    h.api.reject_attempt(1);

    let err = h
      .queue
      .submit(MutationKind::Create, None, json!({"title": ""}))
      .await
      .unwrap_err();

    assert!(matches!(
      err,
      SyncError::Api(crate::error::ApiError::Application { status: 422, .. })
    ));
    assert_eq!(h.queue.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_submit_lines_up_behind_queued_changes() {
    let h = harness(Connectivity::Online);
    h.queue
      .enqueue(MutationKind::Delete, Some("5"), Value::Null)
      .unwrap();

    let outcome = h
      .queue
      .submit(MutationKind::Update, Some("6"), json!({"id": 6}))
      .await
      .unwrap();

    assert!(matches!(outcome, SubmitOutcome::Queued(_)));
    assert_eq!(h.api.attempts(), 0);
  }

  #[tokio::test]
  async fn test_drain_replays_in_order() {
    let h = harness(Connectivity::Online);
    h.queue
      .enqueue(MutationKind::Create, None, json!({"title": "A"}))
      .unwrap();
    h.queue
      .enqueue(MutationKind::Update, Some("9"), json!({"id": 9, "title": "B"}))
      .unwrap();
    h.queue
      .enqueue(MutationKind::Delete, Some("3"), Value::Null)
      .unwrap();

    let report = completed(h.queue.drain().await.unwrap());

    assert_eq!(report.confirmed, 3);
    assert_eq!(report.remaining, 0);
    assert!(report.halted.is_none());
    assert_eq!(
      h.api.received(),
      vec![
        ApiCall::Create(json!({"title": "A"})),
        ApiCall::Update("9".into(), json!({"id": 9, "title": "B"})),
        ApiCall::Delete("3".into()),
      ]
    );
  }

  #[tokio::test]
  async fn test_create_replay_strips_local_identifier() {
    let h = harness(Connectivity::Online);
    h.queue
      .enqueue(MutationKind::Create, None, json!({"id": "local-x", "title": "A"}))
      .unwrap();

    completed(h.queue.drain().await.unwrap());

    assert_eq!(h.api.received(), vec![ApiCall::Create(json!({"title": "A"}))]);
  }

  #[tokio::test]
  async fn test_drain_halts_at_first_failure() {
    let h = harness(Connectivity::Online);
    for title in ["A", "B", "C"] {
      h.queue
        .enqueue(MutationKind::Create, None, json!({ "title": title }))
        .unwrap();
    }
    let before = h.queue.pending().unwrap();
    h.api.drop_attempt(2);

    let report = completed(h.queue.drain().await.unwrap());

    assert_eq!(report.confirmed, 1);
    assert_eq!(report.remaining, 2);
    let halt = report.halted.unwrap();
    assert_eq!(halt.seq, before[1].seq);
    assert!(halt.offline);
    assert_eq!(h.queue.pending().unwrap(), before[1..].to_vec());

    // the next drain starts from the halted item
    let report = completed(h.queue.drain().await.unwrap());
    assert_eq!(report.confirmed, 2);
    assert_eq!(h.api.attempts(), 4);
  }

  #[tokio::test]
  async fn test_application_error_halts_drain() {
    let h = harness(Connectivity::Online);
    h.queue
      .enqueue(MutationKind::Update, Some("1"), json!({"id": 1}))
      .unwrap();
    h.queue
      .enqueue(MutationKind::Update, Some("2"), json!({"id": 2}))
      .unwrap();
    h.api.reject_attempt(1);

    let report = completed(h.queue.drain().await.unwrap());

    let halt = report.halted.unwrap();
    assert!(!halt.offline);
    assert_eq!(report.remaining, 2);
    assert_eq!(h.api.attempts(), 1);
  }

  #[tokio::test]
  async fn test_concurrent_drain_is_a_no_op() {
    let h = harness(Connectivity::Online);
    h.queue
      .enqueue(MutationKind::Create, None, json!({"title": "A"}))
      .unwrap();
    h.queue
      .enqueue(MutationKind::Create, None, json!({"title": "B"}))
      .unwrap();
    h.api.set_delay(Duration::from_millis(50));

    let (first, second) = tokio::join!(h.queue.drain(), h.queue.drain());

    let outcomes = [first.unwrap(), second.unwrap()];
    assert_eq!(
      outcomes
        .iter()
        .filter(|o| **o == DrainOutcome::AlreadyRunning)
        .count(),
      1
    );
    assert_eq!(h.api.attempts(), 2);
    assert!(!h.queue.is_draining());
  }

  #[tokio::test]
  async fn test_edit_after_offline_create_targets_server_id() {
    let h = harness(Connectivity::Offline);
    let created = match h
      .queue
      .submit(MutationKind::Create, None, json!({"title": "A"}))
      .await
      .unwrap()
    {
      SubmitOutcome::Queued(m) => m,
      other => panic!("expected queued, got {:?}", other),
    };
    let local = created.placeholder_id().unwrap();
    h.queue
      .submit(
        MutationKind::Update,
        Some(&local),
        json!({"id": local, "title": "A2"}),
      )
      .await
      .unwrap();

    h.monitor.set_online();
    let report = completed(h.queue.drain().await.unwrap());

    assert_eq!(report.confirmed, 2);
    assert_eq!(
      h.api.received()[1],
      ApiCall::Update("100".into(), json!({"id": 100, "title": "A2"}))
    );
    assert_eq!(
      h.queue.entities().get("100").unwrap().unwrap().payload["title"],
      "A2"
    );
  }

  #[tokio::test]
  async fn test_id_mapping_survives_a_new_queue() {
    let h = harness(Connectivity::Online);
    let created = h
      .queue
      .enqueue(MutationKind::Create, None, json!({"title": "A"}))
      .unwrap();
    let local = created.placeholder_id().unwrap();
    h.queue
      .enqueue(MutationKind::Delete, Some(&local), Value::Null)
      .unwrap();
    h.api.drop_attempt(2);
    completed(h.queue.drain().await.unwrap());

    let restarted = queue_over(h.store.clone(), h.api.clone(), h.monitor.clone());
    let report = completed(restarted.drain().await.unwrap());

    assert_eq!(report.confirmed, 1);
    assert_eq!(h.api.received().last(), Some(&ApiCall::Delete("100".into())));
  }

  #[tokio::test]
  async fn test_unknown_placeholder_is_rejected() {
    let h = harness(Connectivity::Offline);

    let err = h
      .queue
      .enqueue(MutationKind::Update, Some("local-42"), json!({}))
      .unwrap_err();

    assert!(matches!(err, SyncError::UnresolvedPlaceholder(id) if id == "local-42"));
  }

  #[tokio::test]
  async fn test_remove_pending() {
    let h = harness(Connectivity::Offline);
    let a = h
      .queue
      .enqueue(MutationKind::Create, None, json!({"title": "A"}))
      .unwrap();
    let b = h
      .queue
      .enqueue(MutationKind::Create, None, json!({"title": "B"}))
      .unwrap();

    let removed = h.queue.remove_pending(a.seq).unwrap();
    assert_eq!(removed.payload["title"], "A");
    assert!(matches!(
      h.queue.remove_pending(a.seq),
      Err(SyncError::NotFound(_))
    ));
    assert_eq!(h.queue.pending().unwrap(), vec![b]);
  }

  #[tokio::test]
  async fn test_remove_refused_while_submitting() {
    let h = harness(Connectivity::Online);
    let a = h
      .queue
      .enqueue(MutationKind::Create, None, json!({"title": "A"}))
      .unwrap();
    h.api.set_delay(Duration::from_millis(100));

    let removal = async {
      tokio::time::sleep(Duration::from_millis(20)).await;
      h.queue.remove_pending(a.seq)
    };
    let (drained, removed) = tokio::join!(h.queue.drain(), removal);

    assert!(matches!(removed, Err(SyncError::Submitting(seq)) if seq == a.seq));
    assert_eq!(completed(drained.unwrap()).confirmed, 1);
  }

  #[tokio::test]
  async fn test_create_with_queued_dependents_cannot_be_discarded() {
    let h = harness(Connectivity::Offline);
    let a = h
      .queue
      .enqueue(MutationKind::Create, None, json!({"title": "A"}))
      .unwrap();
    let local = a.placeholder_id().unwrap();
    let edit = h
      .queue
      .enqueue(MutationKind::Update, Some(&local), json!({"title": "A2"}))
      .unwrap();
    h.queue
      .enqueue(MutationKind::Create, None, json!({"title": "B"}))
      .unwrap();

    match h.queue.remove_pending(a.seq) {
      Err(SyncError::HasDependents { seq, dependents }) => {
        assert_eq!(seq, a.seq);
        assert_eq!(dependents, vec![edit.seq]);
      }
      other => panic!("expected a dependents error, got {:?}", other),
    }
    assert_eq!(h.queue.pending_count().unwrap(), 3);

    // dropping the edit first frees the create
    h.queue.remove_pending(edit.seq).unwrap();
    h.queue.remove_pending(a.seq).unwrap();

    h.monitor.set_online();
    let report = completed(h.queue.drain().await.unwrap());
    assert_eq!(report.confirmed, 1);
    assert!(report.halted.is_none());
    assert_eq!(h.api.received(), vec![ApiCall::Create(json!({"title": "B"}))]);
  }

  #[tokio::test]
  async fn test_poisoned_submission_slot_is_recovered() {
    let h = harness(Connectivity::Online);
    let a = h
      .queue
      .enqueue(MutationKind::Create, None, json!({"title": "A"}))
      .unwrap();
    let b = h
      .queue
      .enqueue(MutationKind::Create, None, json!({"title": "B"}))
      .unwrap();
    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
      let _slot = h.queue.submitting.lock().unwrap();
      panic!("poison the slot");
    }));
    assert!(h.queue.submitting.is_poisoned());

    h.queue.remove_pending(b.seq).unwrap();
    let report = completed(h.queue.drain().await.unwrap());

    assert_eq!(report.confirmed, 1);
    assert_eq!(h.api.received(), vec![ApiCall::Create(json!({"title": "A"}))]);
    assert!(matches!(
      h.queue.remove_pending(a.seq),
      Err(SyncError::NotFound(_))
    ));
  }

  #[tokio::test]
  async fn test_enqueue_wakes_a_waiter() {
    let h = harness(Connectivity::Online);
    h.queue
      .enqueue(MutationKind::Delete, Some("4"), Value::Null)
      .unwrap();

    // the notification is kept until someone waits
    tokio::time::timeout(Duration::from_secs(1), h.queue.wait_queued())
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_synced_leftovers_are_purged_without_replay() {
    let h = harness(Connectivity::Online);
    let mut leftover = QueuedMutation::new(MutationKind::Create, None, json!({"title": "A"}));
    leftover.synced = true;
    h.store
      .append(crate::store::Partition::Outbox, &leftover.to_value().unwrap())
      .unwrap();

    let report = completed(h.queue.drain().await.unwrap());

    assert_eq!(report.purged, 1);
    assert_eq!(report.confirmed, 0);
    assert_eq!(h.api.attempts(), 0);
  }

  #[test]
  fn test_with_field_keeps_numeric_ids() {
    assert_eq!(
      with_field(&json!({"id": "local-1", "t": 1}), "id", "55"),
      json!({"id": 55, "t": 1})
    );
    assert_eq!(with_field(&json!({"t": 1}), "id", "55"), json!({"t": 1}));
    assert_eq!(
      with_field(&json!({"id": 1}), "id", "REQ-9"),
      json!({"id": "REQ-9"})
    );
  }
}
