use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::channel::RealtimeChannel;
use crate::api::{entity_id, id_string};
use crate::cache::EntityCache;
use crate::event::{EventSender, SyncEvent};

/// Applies pushed entity changes to the local entity cache.
pub struct EntityRefresher {
  entities: EntityCache,
  organization_id: String,
  events: Option<EventSender>,
}

impl EntityRefresher {
  pub fn new(entities: EntityCache, organization_id: impl Into<String>) -> Self {
    Self {
      entities,
      organization_id: organization_id.into(),
      events: None,
    }
  }

  pub fn with_events(mut self, events: EventSender) -> Self {
    self.events = Some(events);
    self
  }

  pub fn upsert_topic(&self) -> String {
    format!("/topic/org.{}/requisitions", self.organization_id)
  }

  pub fn deleted_topic(&self) -> String {
    format!("/topic/org.{}/requisitions/deleted", self.organization_id)
  }

  /// Subscribe both organization topics on `channel`.
  pub fn register(self: Arc<Self>, channel: &RealtimeChannel) {
    let upserts = self.clone();
    channel.subscribe(self.upsert_topic(), move |entity| upserts.apply_upsert(&entity));
    let deletes = self.clone();
    channel.subscribe(self.deleted_topic(), move |payload| deletes.apply_delete(&payload));
  }

  pub fn apply_upsert(&self, entity: &Value) {
    match self.entities.put(entity) {
      Ok(true) => {
        if let Some(id) = entity_id(entity, self.entities.identifier_field()) {
          debug!(%id, "refreshed entity from push");
          self.emit(SyncEvent::EntityRefreshed { id });
        }
      }
      Ok(false) => warn!("pushed entity has no identifier, ignoring"),
      Err(err) => warn!(error = %err, "failed to store pushed entity"),
    }
  }

  /// The deletion topic carries the bare id, or an object holding it.
  pub fn apply_delete(&self, payload: &Value) {
    let id = match payload {
      Value::Object(_) => entity_id(payload, self.entities.identifier_field()),
      other => id_string(other),
    };
    let Some(id) = id else {
      warn!(%payload, "deletion push without an identifier");
      return;
    };
    match self.entities.remove(&id) {
      Ok(()) => {
        debug!(%id, "removed entity from push");
        self.emit(SyncEvent::EntityRemoved { id });
      }
      Err(err) => warn!(%id, error = %err, "failed to drop pushed deletion"),
    }
  }

  fn emit(&self, event: SyncEvent) {
    if let Some(events) = &self.events {
      let _ = events.send(event);
    }
  }
}
