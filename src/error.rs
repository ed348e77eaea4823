//! Error types for the offline-resilience core.
//!
//! The library uses typed errors so callers can branch on the failure class
//! (offline vs rejected vs storage). The binary wraps them in `color_eyre`.

use thiserror::Error;

/// Errors raised by the local store.
#[derive(Debug, Error)]
pub enum StoreError {
  /// The storage medium rejected the operation (locked, full, closed, poisoned).
  #[error("local storage unavailable during {op}: {reason}")]
  Unavailable { op: &'static str, reason: String },

  /// A stored record could not be serialized or parsed back.
  #[error("malformed stored record: {0}")]
  Serialization(#[from] serde_json::Error),

  /// The key kind does not match the partition (e.g. a string key on the outbox).
  #[error("key {key} is not valid for partition {partition}")]
  InvalidKey { partition: &'static str, key: String },

  /// The operation is not supported by the partition (e.g. `append` on entities).
  #[error("{op} is not supported on partition {partition}")]
  Unsupported { op: &'static str, partition: &'static str },
}

impl StoreError {
  pub(crate) fn unavailable(op: &'static str, err: impl std::fmt::Display) -> Self {
    Self::Unavailable {
      op,
      reason: err.to_string(),
    }
  }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the request interception layer.
#[derive(Debug, Error)]
pub enum FetchError {
  /// No response was received at all (connection refused, DNS, timeout).
  #[error("offline: {0}")]
  Offline(String),

  /// The request could not be built.
  #[error("invalid request: {0}")]
  InvalidRequest(String),

  /// A response arrived but could not be followed or read.
  #[error("protocol error: {0}")]
  Protocol(String),

  /// A manifest asset could not be fetched during install.
  #[error("failed to install {url}: status {status}")]
  Install { url: String, status: u16 },

  #[error(transparent)]
  Storage(#[from] StoreError),
}

/// Errors from the remote requisition API.
#[derive(Debug, Error)]
pub enum ApiError {
  /// The server could not be reached. Recoverable by queuing.
  #[error("server unreachable: {0}")]
  Offline(String),

  /// The server answered with a non-2xx status. Never queued.
  #[error("server rejected request ({status}): {message}")]
  Application { status: u16, message: String },

  /// The server answered 2xx but the body was not what we expected.
  #[error("unexpected response: {0}")]
  Decode(String),

  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

impl ApiError {
  pub fn is_offline(&self) -> bool {
    matches!(self, ApiError::Offline(_))
  }
}

impl From<FetchError> for ApiError {
  fn from(err: FetchError) -> Self {
    match err {
      FetchError::Offline(reason) => ApiError::Offline(reason),
      FetchError::InvalidRequest(reason) => ApiError::InvalidRequest(reason),
      FetchError::Protocol(reason) => ApiError::Decode(reason),
      other => ApiError::InvalidRequest(other.to_string()),
    }
  }
}

/// Errors from the mutation queue.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error(transparent)]
  Api(#[from] ApiError),

  #[error(transparent)]
  Store(#[from] StoreError),

  /// The mutation is in flight and cannot be removed right now.
  #[error("mutation {0} is being submitted")]
  Submitting(i64),

  #[error("queued mutation {0} not found")]
  NotFound(i64),

  /// A queued create cannot be discarded while later changes target its placeholder.
  #[error("mutation {seq} is still targeted by queued mutations {dependents:?}")]
  HasDependents { seq: i64, dependents: Vec<i64> },

  /// Update and delete need a target identifier, create must not have one.
  #[error("{kind} mutation {problem}")]
  InvalidTarget {
    kind: &'static str,
    problem: &'static str,
  },

  /// A later mutation still refers to a placeholder whose create never produced an id.
  #[error("placeholder {0} has no server identifier")]
  UnresolvedPlaceholder(String),
}

impl SyncError {
  pub fn is_offline(&self) -> bool {
    matches!(self, SyncError::Api(err) if err.is_offline())
  }
}

/// Errors from the real-time channel. Never surfaced past the channel task.
#[derive(Debug, Error)]
pub enum RealtimeError {
  #[error("malformed STOMP frame: {0}")]
  Frame(String),

  #[error("websocket error: {0}")]
  WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

  #[error("broker reported an error: {0}")]
  Broker(String),

  #[error("broker did not acknowledge CONNECT in time")]
  HandshakeTimeout,
}
