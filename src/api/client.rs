use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use url::Url;

use super::types::{error_message, unwrap_envelope, RemoteApi};
use crate::error::ApiError;
use crate::intercept::{HttpRequest, Interceptor};

/// Requisition API client. Every call goes through the interception layer.
#[derive(Clone)]
pub struct ApiClient {
  interceptor: Interceptor,
  base: Url,
  resource: String,
  token: Option<String>,
}

impl ApiClient {
  /// `base` is the API root, e.g. `http://localhost:8081/api/v1`.
  pub fn new(interceptor: Interceptor, base: Url, token: Option<String>) -> Self {
    Self {
      interceptor,
      base,
      resource: "requisitions".to_string(),
      token,
    }
  }

  pub fn interceptor(&self) -> &Interceptor {
    &self.interceptor
  }

  fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
    let mut url = self.base.clone();
    url
      .path_segments_mut()
      .map_err(|_| ApiError::InvalidRequest(format!("{} cannot be a base URL", self.base)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn resource_url(&self, id: Option<&str>) -> Result<Url, ApiError> {
    match id {
      Some(id) => self.url(&[self.resource.as_str(), id]),
      None => self.url(&[self.resource.as_str()]),
    }
  }

  async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Value, ApiError> {
    let mut request = HttpRequest::new(method, url).with_header("accept", "application/json");
    if let Some(token) = &self.token {
      request = request.with_header("authorization", &format!("Bearer {}", token));
    }
    if let Some(body) = body {
      request = request.with_json(body);
    }

    let response = self.interceptor.fetch(request).await?;

    if !response.is_success() {
      return Err(ApiError::Application {
        status: response.status,
        message: error_message(&response.body),
      });
    }
    if response.body.is_empty() {
      return Ok(Value::Null);
    }

    let value: Value = response
      .json()
      .map_err(|e| ApiError::Decode(format!("invalid JSON body: {}", e)))?;
    Ok(unwrap_envelope(value))
  }

  /// List all requisitions visible to the caller.
  pub async fn list(&self) -> Result<Vec<Value>, ApiError> {
    let url = self.resource_url(None)?;
    match self.send(Method::GET, url, None).await? {
      Value::Array(items) => Ok(items),
      other => Err(ApiError::Decode(format!("expected a list, got {}", other))),
    }
  }

  pub async fn get(&self, id: &str) -> Result<Value, ApiError> {
    let url = self.resource_url(Some(id))?;
    self.send(Method::GET, url, None).await
  }

  /// Hit the health endpoint. Any answer at all means the server is reachable.
  pub async fn health(&self) -> Result<(), ApiError> {
    let url = self.url(&["health"])?;
    self.send(Method::GET, url, None).await.map(|_| ())
  }
}

#[async_trait]
impl RemoteApi for ApiClient {
  async fn create(&self, entity: &Value) -> Result<Value, ApiError> {
    let url = self.resource_url(None)?;
    self.send(Method::POST, url, Some(entity)).await
  }

  async fn update(&self, id: &str, entity: &Value) -> Result<Value, ApiError> {
    let url = self.resource_url(Some(id))?;
    self.send(Method::PUT, url, Some(entity)).await
  }

  async fn delete(&self, id: &str) -> Result<(), ApiError> {
    let url = self.resource_url(Some(id))?;
    self.send(Method::DELETE, url, None).await.map(|_| ())
  }
}
