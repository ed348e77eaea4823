//! Network boundary: plain request/response values and the transport that moves them.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// An outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl HttpRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_json(mut self, body: &Value) -> Self {
    self.body = Some(body.to_string().into_bytes());
    self.with_header("content-type", "application/json")
  }
}

/// A response as received from the network or replayed from the asset cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  /// Final URL after any redirects
  pub url: Url,
  /// Whether the transport followed a redirect to get here
  pub redirected: bool,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
    serde_json::from_slice(&self.body)
  }
}

/// Why no response came back.
#[derive(Debug, Error)]
pub enum TransportError {
  /// Nothing was received: connection refused, DNS failure, timeout, dropped mid-body.
  #[error("{0}")]
  Unreachable(String),
  /// The request itself was malformed.
  #[error("{0}")]
  Invalid(String),
  /// The server answered but the exchange could not be completed: too many
  /// redirects, or a body that failed to decode.
  #[error("{0}")]
  Protocol(String),
}

/// Something that can put a request on the wire.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Production transport on top of `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new(timeout: Duration) -> Result<Self, TransportError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| TransportError::Invalid(format!("failed to build HTTP client: {}", e)))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
    let requested = request.url.clone();
    let mut builder = self.client.request(request.method, request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder.send().await.map_err(classify)?;

    let status = response.status().as_u16();
    let url = response.url().clone();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();
    let body = response.bytes().await.map_err(classify)?.to_vec();

    debug!(%status, url = %url, "response received");

    Ok(HttpResponse {
      status,
      redirected: url != requested,
      url,
      headers,
      body,
    })
  }
}

fn classify(err: reqwest::Error) -> TransportError {
  if err.is_builder() {
    TransportError::Invalid(err.to_string())
  } else if err.is_redirect() || err.is_decode() {
    TransportError::Protocol(err.to_string())
  } else {
    TransportError::Unreachable(err.to_string())
  }
}
