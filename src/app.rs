use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::cache::{CacheResult, EntityCache};
use crate::config::Config;
use crate::connectivity::{Connectivity, ConnectivityMonitor, HealthProbe};
use crate::event::{EventHandler, SyncEvent};
use crate::intercept::{Interceptor, ReqwestTransport, RoutePolicy};
use crate::realtime::{ChannelSettings, EntityRefresher, RealtimeChannel};
use crate::store::SqliteStore;
use crate::sync::{Backoff, DrainOutcome, MutationKind, MutationQueue, SubmitOutcome};

/// Fully wired offline-resilience core
pub struct App {
  config: Config,
  store: Arc<SqliteStore>,
  interceptor: Interceptor,
  api: ApiClient,
  entities: EntityCache,
  monitor: ConnectivityMonitor,
  queue: Arc<MutationQueue>,
  events: EventHandler,
}

impl App {
  /// Open the store and build every component. Starts believing offline;
  /// call `probe` or `run` to learn otherwise.
  pub fn new(config: Config) -> Result<Self> {
    let store = Arc::new(SqliteStore::open(config.store.path.as_deref())?);
    let transport = ReqwestTransport::new(config.request_timeout())
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    let interceptor = Interceptor::new(
      Arc::new(transport),
      store.clone(),
      config.origin()?,
      RoutePolicy::new(config.server.api_prefix.clone()),
      config.asset_settings(),
    );
    let api = ApiClient::new(interceptor.clone(), config.api_url()?, Config::get_api_token());

    let events = EventHandler::new();
    let entities = EntityCache::new(store.clone(), config.sync.identifier_field.clone());
    let monitor = ConnectivityMonitor::new(Connectivity::Offline).with_events(events.sender());
    let queue = Arc::new(
      MutationQueue::new(
        store.clone(),
        Arc::new(api.clone()),
        entities.clone(),
        monitor.clone(),
      )
      .with_events(events.sender()),
    );

    Ok(Self {
      config,
      store,
      interceptor,
      api,
      entities,
      monitor,
      queue,
      events,
    })
  }

  pub fn queue(&self) -> &MutationQueue {
    &self.queue
  }

  pub fn interceptor(&self) -> &Interceptor {
    &self.interceptor
  }

  pub fn monitor(&self) -> &ConnectivityMonitor {
    &self.monitor
  }

  /// Ask the server once whether it is reachable and update the monitor.
  pub async fn probe(&self) -> Connectivity {
    let state = self.health_probe().check().await;
    match state {
      Connectivity::Online => self.monitor.set_online(),
      Connectivity::Offline => self.monitor.set_offline(),
    }
    state
  }

  /// Probe, and when the server answers replay the outbox once so a command
  /// never lines up behind changes that could already have gone out.
  pub async fn connect(&self) -> Connectivity {
    let state = self.probe().await;
    if !state.is_online() {
      return state;
    }
    match self.queue.drain().await {
      Ok(DrainOutcome::Completed(report)) => match report.halted {
        Some(halt) => warn!(
          seq = halt.seq,
          remaining = report.remaining,
          error = %halt.error,
          "startup sync halted"
        ),
        None if report.confirmed > 0 => info!(confirmed = report.confirmed, "startup sync complete"),
        None => {}
      },
      Ok(DrainOutcome::AlreadyRunning) => {}
      Err(err) => warn!(error = %err, "startup sync failed"),
    }
    state
  }

  pub async fn submit(
    &self,
    kind: MutationKind,
    target: Option<&str>,
    payload: Value,
  ) -> Result<SubmitOutcome> {
    Ok(self.queue.submit(kind, target, payload).await?)
  }

  pub async fn drain(&self) -> Result<DrainOutcome> {
    Ok(self.queue.drain().await?)
  }

  pub async fn list(&self) -> Result<CacheResult<Vec<Value>>> {
    let api = self.api.clone();
    Ok(self.entities.fetch_all(|| async move { api.list().await }).await?)
  }

  pub async fn get(&self, id: &str) -> Result<CacheResult<Value>> {
    let api = self.api.clone();
    let target = id.to_string();
    Ok(
      self
        .entities
        .fetch_one(id, || async move { api.get(&target).await })
        .await?,
    )
  }

  /// Run the sync agent until Ctrl-C: health probe, drain on reconnect,
  /// real-time refresh.
  pub async fn run(&mut self) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let probe = self.health_probe();
    tasks.push(tokio::spawn(probe.run(shutdown_rx.clone())));

    let (initial, max) = self.config.backoff();
    let monitor = self.monitor.clone();
    let queue = self.queue.clone();
    let runner_shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
      monitor
        .run(queue, Backoff::new(initial, max), runner_shutdown)
        .await
    }));

    let channel = self.realtime_channel()?;
    if let Some(channel) = &channel {
      channel.connect();
    }

    info!("sync agent running");
    loop {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => {
          info!("interrupt received, shutting down");
          break;
        }
        event = self.events.next() => match event {
          Some(event) => self.handle_event(event),
          None => break,
        },
      }
    }

    let _ = shutdown_tx.send(true);
    if let Some(channel) = &channel {
      channel.disconnect().await;
    }
    for task in tasks {
      if let Err(e) = task.await {
        warn!(error = %e, "background task ended abnormally");
      }
    }
    Ok(())
  }

  /// Wait for background revalidations and close the store.
  pub async fn shutdown(self) -> Result<()> {
    self.interceptor.settle().await;
    self.store.close()?;
    debug!("store closed");
    Ok(())
  }

  fn health_probe(&self) -> HealthProbe {
    HealthProbe::new(
      self.api.clone(),
      self.monitor.clone(),
      self.config.health_interval(),
    )
  }

  fn realtime_channel(&self) -> Result<Option<RealtimeChannel>> {
    let realtime = &self.config.realtime;
    if !realtime.enabled {
      return Ok(None);
    }
    let Some(organization) = realtime.organization_id.clone() else {
      info!("no realtime.organization_id configured, push updates disabled");
      return Ok(None);
    };

    let channel = RealtimeChannel::new(ChannelSettings {
      url: self.config.ws_url()?,
      reconnect_delay: std::time::Duration::from_secs(realtime.reconnect_delay_secs),
      heartbeat: std::time::Duration::from_secs(realtime.heartbeat_secs),
    })
    .with_events(self.events.sender());
    let refresher =
      EntityRefresher::new(self.entities.clone(), organization).with_events(self.events.sender());
    Arc::new(refresher).register(&channel);
    Ok(Some(channel))
  }

  fn handle_event(&self, event: SyncEvent) {
    match event {
      SyncEvent::Connectivity(state) => info!(?state, "connectivity"),
      SyncEvent::Queued { seq, kind } => info!(seq, %kind, "change queued"),
      SyncEvent::Drained(report) => match report.halted {
        Some(halt) => warn!(
          confirmed = report.confirmed,
          remaining = report.remaining,
          seq = halt.seq,
          error = %halt.error,
          "sync halted"
        ),
        None => info!(confirmed = report.confirmed, "sync complete"),
      },
      SyncEvent::Discarded { seq } => info!(seq, "queued change discarded"),
      SyncEvent::EntityRefreshed { id } => debug!(%id, "entity refreshed"),
      SyncEvent::EntityRemoved { id } => debug!(%id, "entity removed"),
      SyncEvent::Channel(state) => debug!(?state, "realtime channel"),
    }
  }
}
