//! Test doubles for the network boundary.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::api::RemoteApi;
use crate::error::ApiError;
use crate::intercept::{HttpRequest, HttpResponse, Transport, TransportError};

/// Transport that answers from a route table and can be switched offline.
pub struct FakeTransport {
  online: AtomicBool,
  routes: Mutex<HashMap<String, HttpResponse>>,
  calls: Mutex<Vec<String>>,
}

impl FakeTransport {
  pub fn new() -> Self {
    Self {
      online: AtomicBool::new(true),
      routes: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn respond(&self, url: Url, status: u16, body: &str) {
    self.respond_from(url.clone(), url, status, body);
  }

  pub fn respond_from(&self, url: Url, served_from: Url, status: u16, body: &str) {
    self.insert(url, served_from, false, status, body);
  }

  pub fn respond_redirected(&self, url: Url, served_from: Url, status: u16, body: &str) {
    self.insert(url, served_from, true, status, body);
  }

  fn insert(&self, url: Url, served_from: Url, redirected: bool, status: u16, body: &str) {
    let response = HttpResponse {
      status,
      url: served_from,
      redirected,
      headers: vec![("content-type".to_string(), "text/plain".to_string())],
      body: body.as_bytes().to_vec(),
    };
    self.routes.lock().unwrap().insert(url.to_string(), response);
  }

  pub fn calls_to(&self, url: &Url) -> usize {
    let target = url.to_string();
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|c| **c == target)
      .count()
  }
}

#[async_trait]
impl Transport for FakeTransport {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    let key = request.url.to_string();
    self.calls.lock().unwrap().push(key.clone());

    if !self.online.load(Ordering::SeqCst) {
      return Err(TransportError::Unreachable("connection refused".to_string()));
    }

    let found = self.routes.lock().unwrap().get(&key).cloned();
    Ok(found.unwrap_or(HttpResponse {
      status: 404,
      url: request.url,
      redirected: false,
      headers: Vec::new(),
      body: Vec::new(),
    }))
  }
}

/// A call the fake server accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
  Create(Value),
  Update(String, Value),
  Delete(String),
}

/// In-process stand-in for the requisition server.
pub struct FakeApi {
  online: AtomicBool,
  next_id: AtomicU64,
  attempts: AtomicU64,
  offline_attempts: Mutex<HashSet<u64>>,
  rejected_attempts: Mutex<HashSet<u64>>,
  delay: Mutex<Option<Duration>>,
  received: Mutex<Vec<ApiCall>>,
}

impl FakeApi {
  pub fn new() -> Self {
    Self {
      online: AtomicBool::new(true),
      next_id: AtomicU64::new(100),
      attempts: AtomicU64::new(0),
      offline_attempts: Mutex::new(HashSet::new()),
      rejected_attempts: Mutex::new(HashSet::new()),
      delay: Mutex::new(None),
      received: Mutex::new(Vec::new()),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Make the n-th attempt (1-based, counted across all calls) fail as offline.
  pub fn drop_attempt(&self, n: u64) {
    self.offline_attempts.lock().unwrap().insert(n);
  }

  /// Make the n-th attempt (1-based) come back as a 422.
  pub fn reject_attempt(&self, n: u64) {
    self.rejected_attempts.lock().unwrap().insert(n);
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  pub fn attempts(&self) -> u64 {
    self.attempts.load(Ordering::SeqCst)
  }

  pub fn received(&self) -> Vec<ApiCall> {
    self.received.lock().unwrap().clone()
  }

  async fn attempt(&self) -> Result<(), ApiError> {
    let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    if !self.online.load(Ordering::SeqCst) || self.offline_attempts.lock().unwrap().contains(&n) {
      return Err(ApiError::Offline("connection refused".to_string()));
    }
    if self.rejected_attempts.lock().unwrap().contains(&n) {
      return Err(ApiError::Application {
        status: 422,
        message: "validation failed".to_string(),
      });
    }
    Ok(())
  }
}

#[async_trait]
impl RemoteApi for FakeApi {
  async fn create(&self, entity: &Value) -> Result<Value, ApiError> {
    self.attempt().await?;
    self
      .received
      .lock()
      .unwrap()
      .push(ApiCall::Create(entity.clone()));
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let mut created = entity.clone();
    if let Some(obj) = created.as_object_mut() {
      obj.insert("id".to_string(), json!(id));
    }
    Ok(created)
  }

  async fn update(&self, id: &str, entity: &Value) -> Result<Value, ApiError> {
    self.attempt().await?;
    self
      .received
      .lock()
      .unwrap()
      .push(ApiCall::Update(id.to_string(), entity.clone()));
    Ok(entity.clone())
  }

  async fn delete(&self, id: &str) -> Result<(), ApiError> {
    self.attempt().await?;
    self
      .received
      .lock()
      .unwrap()
      .push(ApiCall::Delete(id.to_string()));
    Ok(())
  }
}
