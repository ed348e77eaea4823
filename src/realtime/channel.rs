use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::stomp::{Frame, HeartBeat, HEARTBEAT};
use crate::error::RealtimeError;
use crate::event::{EventSender, SyncEvent};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Callback for messages arriving on one topic.
pub type Handler = Arc<dyn Fn(Value) + Send + Sync>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
  Connecting,
  Connected,
  Disconnected,
  Stopped,
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
  pub url: Url,
  pub reconnect_delay: Duration,
  pub heartbeat: Duration,
}

type Subscriptions = Arc<Mutex<BTreeMap<String, Handler>>>;

struct Running {
  stop: watch::Sender<bool>,
  control: mpsc::UnboundedSender<String>,
  task: JoinHandle<()>,
}

/// Reconnecting STOMP-over-WebSocket subscriber.
///
/// Subscriptions survive reconnects: every new session re-issues a SUBSCRIBE
/// for each registered topic. The channel only ever reads; nothing else in the
/// crate waits on it.
pub struct RealtimeChannel {
  settings: ChannelSettings,
  subscriptions: Subscriptions,
  running: Mutex<Option<Running>>,
  events: Option<EventSender>,
}

enum SessionEnd {
  Stopped,
  Dropped,
}

impl RealtimeChannel {
  pub fn new(settings: ChannelSettings) -> Self {
    Self {
      settings,
      subscriptions: Arc::new(Mutex::new(BTreeMap::new())),
      running: Mutex::new(None),
      events: None,
    }
  }

  pub fn with_events(mut self, events: EventSender) -> Self {
    self.events = Some(events);
    self
  }

  /// Register `handler` for `topic`, replacing any earlier handler for it.
  ///
  /// Works before `connect`; the subscription is sent once a session exists.
  pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F)
  where
    F: Fn(Value) + Send + Sync + 'static,
  {
    let topic = topic.into();
    self
      .subscriptions
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(topic.clone(), Arc::new(handler));

    if let Some(running) = self
      .running
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
    {
      let _ = running.control.send(topic);
    }
  }

  /// Start the background session loop. A second call while running is a no-op.
  pub fn connect(&self) {
    let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
    if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
      return;
    }

    let (stop, stop_rx) = watch::channel(false);
    let (control, control_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(session_loop(
      self.settings.clone(),
      self.subscriptions.clone(),
      control_rx,
      stop_rx,
      self.events.clone(),
    ));
    *running = Some(Running {
      stop,
      control,
      task,
    });
  }

  /// Stop the session loop and wait for it to finish. Subscriptions are kept.
  pub async fn disconnect(&self) {
    let running = self
      .running
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(running) = running {
      let _ = running.stop.send(true);
      if let Err(err) = running.task.await {
        warn!(error = %err, "realtime task ended abnormally");
      }
    }
  }

  pub fn is_running(&self) -> bool {
    self
      .running
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .is_some_and(|r| !r.task.is_finished())
  }
}

async fn session_loop(
  settings: ChannelSettings,
  subscriptions: Subscriptions,
  mut control: mpsc::UnboundedReceiver<String>,
  mut stop: watch::Receiver<bool>,
  events: Option<EventSender>,
) {
  let emit = |state: ChannelState| {
    if let Some(events) = &events {
      let _ = events.send(SyncEvent::Channel(state));
    }
  };

  loop {
    emit(ChannelState::Connecting);
    match session(&settings, &subscriptions, &mut control, &mut stop, &emit).await {
      Ok(SessionEnd::Stopped) => break,
      Ok(SessionEnd::Dropped) => info!("realtime connection closed"),
      Err(err) => warn!(error = %err, "realtime session failed"),
    }
    emit(ChannelState::Disconnected);

    debug!(delay = ?settings.reconnect_delay, "reconnecting realtime channel");
    tokio::select! {
      _ = tokio::time::sleep(settings.reconnect_delay) => {}
      _ = stop.changed() => break,
    }
  }
  emit(ChannelState::Stopped);
}

async fn session(
  settings: &ChannelSettings,
  subscriptions: &Subscriptions,
  control: &mut mpsc::UnboundedReceiver<String>,
  stop: &mut watch::Receiver<bool>,
  emit: &impl Fn(ChannelState),
) -> Result<SessionEnd, RealtimeError> {
  let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, open(settings));
  let (mut socket, heartbeat) = tokio::select! {
    opened = handshake => opened.map_err(|_| RealtimeError::HandshakeTimeout)??,
    _ = stop.changed() => return Ok(SessionEnd::Stopped),
  };
  info!(url = %settings.url, "realtime channel connected");
  emit(ChannelState::Connected);

  let mut sent = HashSet::new();
  let topics: Vec<String> = subscriptions
    .lock()
    .unwrap_or_else(PoisonError::into_inner)
    .keys()
    .cloned()
    .collect();
  for topic in topics {
    send_subscribe(&mut socket, &mut sent, topic).await?;
  }

  let mut outgoing = heartbeat.send.map(ticker);
  let mut watchdog = heartbeat.expect.map(ticker);
  let mut last_seen = Instant::now();

  loop {
    tokio::select! {
      incoming = socket.next() => {
        last_seen = Instant::now();
        match incoming {
          None | Some(Ok(Message::Close(_))) => return Ok(SessionEnd::Dropped),
          Some(Err(err)) => return Err(err.into()),
          Some(Ok(Message::Text(text))) => {
            if let Some(frame) = Frame::parse(&text)? {
              dispatch(frame, subscriptions)?;
            }
          }
          Some(Ok(_)) => {}
        }
      }
      Some(topic) = control.recv() => {
        send_subscribe(&mut socket, &mut sent, topic).await?;
      }
      _ = tick(&mut outgoing) => {
        socket.send(Message::Text(HEARTBEAT.to_string())).await?;
      }
      _ = tick(&mut watchdog) => {
        if let Some(expect) = heartbeat.expect {
          if last_seen.elapsed() > expect * 2 {
            warn!(silent_for = ?last_seen.elapsed(), "broker heart-beat missed");
            return Ok(SessionEnd::Dropped);
          }
        }
      }
      _ = stop.changed() => {
        let _ = socket.send(Message::Text(Frame::disconnect().encode())).await;
        let _ = socket.close(None).await;
        return Ok(SessionEnd::Stopped);
      }
    }
  }
}

/// Open the socket and complete the STOMP handshake.
async fn open(settings: &ChannelSettings) -> Result<(Socket, HeartBeat), RealtimeError> {
  let (mut socket, _) = connect_async(settings.url.as_str()).await?;
  let host = settings.url.host_str().unwrap_or("localhost");
  socket
    .send(Message::Text(Frame::connect(host, settings.heartbeat).encode()))
    .await?;

  while let Some(message) = socket.next().await {
    let Message::Text(text) = message? else {
      continue;
    };
    let Some(frame) = Frame::parse(&text)? else {
      continue;
    };
    match frame.command.as_str() {
      "CONNECTED" => {
        let heartbeat = HeartBeat::negotiate(settings.heartbeat, &frame);
        return Ok((socket, heartbeat));
      }
      "ERROR" => return Err(broker_error(&frame)),
      other => debug!(command = other, "ignoring frame before CONNECTED"),
    }
  }
  Err(RealtimeError::Broker("connection closed during handshake".to_string()))
}

async fn send_subscribe(
  socket: &mut Socket,
  sent: &mut HashSet<String>,
  topic: String,
) -> Result<(), RealtimeError> {
  if sent.contains(&topic) {
    return Ok(());
  }
  let id = format!("sub-{}", sent.len());
  socket
    .send(Message::Text(Frame::subscribe(&id, &topic).encode()))
    .await?;
  debug!(%topic, %id, "subscribed");
  sent.insert(topic);
  Ok(())
}

fn dispatch(frame: Frame, subscriptions: &Subscriptions) -> Result<(), RealtimeError> {
  match frame.command.as_str() {
    "MESSAGE" => {
      let Some(destination) = frame.header("destination") else {
        warn!("MESSAGE frame without destination");
        return Ok(());
      };
      let handler = subscriptions
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(destination)
        .cloned();
      match handler {
        Some(handler) => {
          let payload =
            serde_json::from_str(&frame.body).unwrap_or_else(|_| Value::String(frame.body.clone()));
          handler(payload);
        }
        None => debug!(%destination, "message for unknown topic"),
      }
      Ok(())
    }
    "ERROR" => Err(broker_error(&frame)),
    "RECEIPT" => Ok(()),
    other => {
      debug!(command = other, "ignoring frame");
      Ok(())
    }
  }
}

fn broker_error(frame: &Frame) -> RealtimeError {
  let message = frame.header("message").unwrap_or("no message");
  if frame.body.is_empty() {
    RealtimeError::Broker(message.to_string())
  } else {
    RealtimeError::Broker(format!("{}: {}", message, frame.body))
  }
}

fn ticker(period: Duration) -> Interval {
  let mut interval = tokio::time::interval_at(Instant::now() + period, period);
  interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
  interval
}

async fn tick(interval: &mut Option<Interval>) {
  match interval {
    Some(interval) => {
      interval.tick().await;
    }
    None => std::future::pending().await,
  }
}
