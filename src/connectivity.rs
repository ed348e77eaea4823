//! Online/offline tracking and the drain-on-reconnect trigger.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::event::{EventSender, SyncEvent};
use crate::sync::{Backoff, DrainOutcome, MutationQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Online,
  Offline,
}

impl Connectivity {
  pub fn is_online(self) -> bool {
    self == Connectivity::Online
  }
}

/// Current belief about reachability.
///
/// Fed by platform signals or a `HealthProbe`. Clones share state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
  state: Arc<watch::Sender<Connectivity>>,
  events: Option<EventSender>,
}

impl ConnectivityMonitor {
  pub fn new(initial: Connectivity) -> Self {
    let (tx, _rx) = watch::channel(initial);
    Self {
      state: Arc::new(tx),
      events: None,
    }
  }

  pub fn with_events(mut self, events: EventSender) -> Self {
    self.events = Some(events);
    self
  }

  pub fn current(&self) -> Connectivity {
    *self.state.borrow()
  }

  pub fn is_online(&self) -> bool {
    self.current().is_online()
  }

  pub fn set_online(&self) {
    self.set(Connectivity::Online);
  }

  pub fn set_offline(&self) {
    self.set(Connectivity::Offline);
  }

  pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
    self.state.subscribe()
  }

  fn set(&self, next: Connectivity) {
    let changed = self.state.send_if_modified(|state| {
      if *state == next {
        return false;
      }
      *state = next;
      true
    });
    if changed {
      info!(state = ?next, "connectivity changed");
      if let Some(events) = &self.events {
        let _ = events.send(SyncEvent::Connectivity(next));
      }
    }
  }

  /// Drain the queue at startup if online, then on every offline-to-online
  /// transition and whenever a change is queued while online, until
  /// `shutdown` flips or its sender goes away.
  pub async fn run(
    &self,
    queue: Arc<MutationQueue>,
    mut backoff: Backoff,
    mut shutdown: watch::Receiver<bool>,
  ) {
    let mut state = self.subscribe();
    if self.is_online() {
      debug!("online at startup, draining");
      self.drain_with_retry(&queue, &mut backoff, &mut shutdown).await;
    }

    loop {
      if *shutdown.borrow() {
        break;
      }
      tokio::select! {
        changed = state.changed() => {
          if changed.is_err() {
            break;
          }
          let now = *state.borrow_and_update();
          if now.is_online() {
            self.drain_with_retry(&queue, &mut backoff, &mut shutdown).await;
          }
        }
        _ = queue.wait_queued() => {
          if self.is_online() {
            debug!("change queued while online, draining");
            self.drain_with_retry(&queue, &mut backoff, &mut shutdown).await;
          }
        }
        _ = shutdown.changed() => break,
      }
    }
    debug!("connectivity runner stopped");
  }

  /// Drain; if it halts on an unreachable server while the monitor still
  /// says online, wait out the backoff and try again.
  async fn drain_with_retry(
    &self,
    queue: &MutationQueue,
    backoff: &mut Backoff,
    shutdown: &mut watch::Receiver<bool>,
  ) {
    loop {
      let report = match queue.drain().await {
        Ok(DrainOutcome::Completed(report)) => report,
        Ok(DrainOutcome::AlreadyRunning) => return,
        Err(err) => {
          warn!(error = %err, "drain aborted");
          return;
        }
      };
      match report.halted {
        None => {
          backoff.reset();
          return;
        }
        Some(halt) if halt.offline && self.is_online() => {
          let delay = backoff.next_delay();
          warn!(seq = halt.seq, ?delay, "server unreachable while online, retrying drain");
          tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
          }
          if !self.is_online() {
            return;
          }
        }
        // application errors wait for the user
        Some(_) => return,
      }
    }
  }
}

/// Polls the server health endpoint and feeds the monitor.
pub struct HealthProbe {
  api: ApiClient,
  monitor: ConnectivityMonitor,
  interval: Duration,
}

impl HealthProbe {
  pub fn new(api: ApiClient, monitor: ConnectivityMonitor, interval: Duration) -> Self {
    Self {
      api,
      monitor,
      interval,
    }
  }

  /// Any answer from the server counts as reachable.
  pub async fn check(&self) -> Connectivity {
    match self.api.health().await {
      Ok(()) => Connectivity::Online,
      Err(err) if err.is_offline() => Connectivity::Offline,
      Err(err) => {
        debug!(error = %err, "health check returned an error, server reachable");
        Connectivity::Online
      }
    }
  }

  pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
      tokio::select! {
        _ = ticker.tick() => match self.check().await {
          Connectivity::Online => self.monitor.set_online(),
          Connectivity::Offline => self.monitor.set_offline(),
        },
        _ = shutdown.changed() => break,
      }
    }
    debug!("health probe stopped");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::EntityCache;
  use crate::event::EventHandler;
  use crate::intercept::{AssetSettings, Interceptor, ReqwestTransport, RoutePolicy};
  use crate::store::SqliteStore;
  use crate::sync::MutationKind;
  use crate::testing::{ApiCall, FakeApi};
  use serde_json::json;
  use url::Url;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn queue_with(api: Arc<FakeApi>, monitor: &ConnectivityMonitor) -> Arc<MutationQueue> {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let entities = EntityCache::new(store.clone(), "id");
    Arc::new(MutationQueue::new(store, api, entities, monitor.clone()))
  }

  async fn wait_until_empty(queue: &MutationQueue) {
    for _ in 0..200 {
      if queue.pending_count().unwrap() == 0 && !queue.is_draining() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("outbox never drained");
  }

  #[test]
  fn test_transitions_are_reported_once() {
    let mut events = EventHandler::new();
    let monitor = ConnectivityMonitor::new(Connectivity::Offline).with_events(events.sender());

    monitor.set_online();
    monitor.set_online();
    monitor.set_offline();

    let mut seen = Vec::new();
    while let Some(event) = events.try_next() {
      seen.push(event);
    }
    assert_eq!(seen.len(), 2);
    assert!(!monitor.is_online());
  }

  #[tokio::test]
  async fn test_reconnect_drains_in_order() {
    let api = Arc::new(FakeApi::new());
    let monitor = ConnectivityMonitor::new(Connectivity::Offline);
    let queue = queue_with(api.clone(), &monitor);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = {
      let monitor = monitor.clone();
      let queue = queue.clone();
      tokio::spawn(async move { monitor.run(queue, Backoff::default(), shutdown_rx).await })
    };

    queue
      .submit(MutationKind::Create, None, json!({"title": "A"}))
      .await
      .unwrap();
    queue
      .submit(MutationKind::Create, None, json!({"title": "B"}))
      .await
      .unwrap();
    assert_eq!(api.attempts(), 0);

    monitor.set_online();
    wait_until_empty(&queue).await;

    assert_eq!(
      api.received(),
      vec![
        ApiCall::Create(json!({"title": "A"})),
        ApiCall::Create(json!({"title": "B"})),
      ]
    );

    shutdown_tx.send(true).unwrap();
    runner.await.unwrap();
  }

  #[tokio::test]
  async fn test_drains_at_startup_when_online() {
    let api = Arc::new(FakeApi::new());
    let monitor = ConnectivityMonitor::new(Connectivity::Online);
    let queue = queue_with(api.clone(), &monitor);
    queue
      .enqueue(MutationKind::Delete, Some("8"), serde_json::Value::Null)
      .unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = tokio::spawn({
      let monitor = monitor.clone();
      let queue = queue.clone();
      async move { monitor.run(queue, Backoff::default(), shutdown_rx).await }
    });

    wait_until_empty(&queue).await;
    assert_eq!(api.received(), vec![ApiCall::Delete("8".into())]);

    drop(shutdown_tx);
    runner.await.unwrap();
  }

  #[tokio::test]
  async fn test_retries_with_backoff_while_online() {
    let api = Arc::new(FakeApi::new());
    let monitor = ConnectivityMonitor::new(Connectivity::Online);
    let queue = queue_with(api.clone(), &monitor);
    queue
      .enqueue(MutationKind::Create, None, json!({"title": "A"}))
      .unwrap();
    api.drop_attempt(1);
    api.drop_attempt(2);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let backoff = Backoff::new(Duration::from_millis(5), Duration::from_millis(20));

    let runner = tokio::spawn({
      let monitor = monitor.clone();
      let queue = queue.clone();
      async move { monitor.run(queue, backoff, shutdown_rx).await }
    });

    wait_until_empty(&queue).await;
    assert_eq!(api.attempts(), 3);

    shutdown_tx.send(true).unwrap();
    runner.await.unwrap();
  }

  #[tokio::test]
  async fn test_changes_queued_while_online_are_drained() {
    let api = Arc::new(FakeApi::new());
    let monitor = ConnectivityMonitor::new(Connectivity::Online);
    let queue = queue_with(api.clone(), &monitor);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let backoff = Backoff::new(Duration::from_millis(5), Duration::from_millis(20));

    let runner = tokio::spawn({
      let monitor = monitor.clone();
      let queue = queue.clone();
      async move { monitor.run(queue, backoff, shutdown_rx).await }
    });

    // a blip the monitor never sees
    api.set_online(false);
    let first = queue
      .submit(MutationKind::Create, None, json!({"title": "A"}))
      .await
      .unwrap();
    assert!(matches!(first, crate::sync::SubmitOutcome::Queued(_)));
    api.set_online(true);
    queue
      .submit(MutationKind::Create, None, json!({"title": "B"}))
      .await
      .unwrap();

    wait_until_empty(&queue).await;
    assert!(monitor.is_online());
    assert_eq!(
      api.received(),
      vec![
        ApiCall::Create(json!({"title": "A"})),
        ApiCall::Create(json!({"title": "B"})),
      ]
    );

    shutdown_tx.send(true).unwrap();
    runner.await.unwrap();
  }

  fn probe_for(server_uri: &str, monitor: &ConnectivityMonitor) -> HealthProbe {
    let origin = Url::parse(server_uri).unwrap();
    let interceptor = Interceptor::new(
      Arc::new(ReqwestTransport::new(Duration::from_secs(2)).unwrap()),
      Arc::new(SqliteStore::open_in_memory().unwrap()),
      origin.clone(),
      RoutePolicy::default(),
      AssetSettings::default(),
    );
    let api = ApiClient::new(interceptor, origin.join("/api/v1").unwrap(), None);
    HealthProbe::new(api, monitor.clone(), Duration::from_millis(10))
  }

  #[tokio::test]
  async fn test_health_probe_classifies_answers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/health"))
      .respond_with(ResponseTemplate::new(503))
      .mount(&server)
      .await;
    let monitor = ConnectivityMonitor::new(Connectivity::Offline);

    let probe = probe_for(&server.uri(), &monitor);
    assert_eq!(probe.check().await, Connectivity::Online);

    let port = std::net::TcpListener::bind("127.0.0.1:0")
      .unwrap()
      .local_addr()
      .unwrap()
      .port();
    let probe = probe_for(&format!("http://127.0.0.1:{}", port), &monitor);
    assert_eq!(probe.check().await, Connectivity::Offline);
  }

  #[tokio::test]
  async fn test_health_probe_flips_monitor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/health"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "UP"})))
      .mount(&server)
      .await;
    let monitor = ConnectivityMonitor::new(Connectivity::Offline);
    let mut state = monitor.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let probe = tokio::spawn(probe_for(&server.uri(), &monitor).run(shutdown_rx));

    tokio::time::timeout(Duration::from_secs(2), state.changed())
      .await
      .unwrap()
      .unwrap();
    assert!(monitor.is_online());

    shutdown_tx.send(true).unwrap();
    probe.await.unwrap();
  }
}
