use tokio::sync::mpsc;

use crate::connectivity::Connectivity;
use crate::realtime::ChannelState;
use crate::store::Seq;
use crate::sync::{DrainReport, MutationKind};

/// Things the sync core reports to whoever drives it
#[derive(Debug, Clone)]
pub enum SyncEvent {
  /// Online/offline transition
  Connectivity(Connectivity),
  /// A change was written to the outbox
  Queued { seq: Seq, kind: MutationKind },
  /// A drain ran to completion or halted
  Drained(DrainReport),
  /// A queued change was discarded by the user
  Discarded { seq: Seq },
  /// A pushed entity replaced the cached copy
  EntityRefreshed { id: String },
  /// A pushed deletion removed the cached copy
  EntityRemoved { id: String },
  /// Real-time channel state change
  Channel(ChannelState),
}

pub type EventSender = mpsc::UnboundedSender<SyncEvent>;

/// Fan-in point for events from every background task
pub struct EventHandler {
  tx: EventSender,
  rx: mpsc::UnboundedReceiver<SyncEvent>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Handle for producers
  pub fn sender(&self) -> EventSender {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<SyncEvent> {
    self.rx.recv().await
  }

  /// Take an already-queued event without waiting
  pub fn try_next(&mut self) -> Option<SyncEvent> {
    self.rx.try_recv().ok()
  }
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}
