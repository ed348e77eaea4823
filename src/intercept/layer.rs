//! Interceptor that applies network-first or stale-while-revalidate per request.

use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use super::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::error::FetchError;
use crate::store::{AssetCache, CachedAsset};

/// Which strategy a request gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Dynamic API call, network-first
  Api,
  /// Static asset, stale-while-revalidate
  StaticAsset,
}

/// Path-prefix rule that separates API calls from static assets.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
  api_prefix: String,
}

impl RoutePolicy {
  pub fn new(api_prefix: impl Into<String>) -> Self {
    Self {
      api_prefix: api_prefix.into(),
    }
  }

  pub fn classify(&self, url: &Url) -> RequestClass {
    if url.path().starts_with(&self.api_prefix) {
      RequestClass::Api
    } else {
      RequestClass::StaticAsset
    }
  }
}

impl Default for RoutePolicy {
  fn default() -> Self {
    Self::new("/api/")
  }
}

/// Versioned static-asset cache settings.
#[derive(Debug, Clone)]
pub struct AssetSettings {
  pub prefix: String,
  pub version: String,
  /// Paths fetched at install time, relative to the app origin
  pub manifest: Vec<String>,
}

impl AssetSettings {
  pub fn cache_name(&self) -> String {
    format!("{}-{}", self.prefix, self.version)
  }
}

impl Default for AssetSettings {
  fn default() -> Self {
    Self {
      prefix: "requisition-app".to_string(),
      version: "v1".to_string(),
      manifest: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
      ],
    }
  }
}

/// Interception layer in front of the network.
///
/// Cheap to clone; clones share the transport, the asset cache and the set of
/// in-flight background revalidations.
#[derive(Clone)]
pub struct Interceptor {
  transport: Arc<dyn Transport>,
  assets: Arc<dyn AssetCache>,
  policy: RoutePolicy,
  origin: Url,
  cache_name: String,
  manifest: Vec<String>,
  revalidations: Arc<Mutex<JoinSet<()>>>,
}

impl Interceptor {
  pub fn new(
    transport: Arc<dyn Transport>,
    assets: Arc<dyn AssetCache>,
    origin: Url,
    policy: RoutePolicy,
    settings: AssetSettings,
  ) -> Self {
    Self {
      transport,
      assets,
      policy,
      origin,
      cache_name: settings.cache_name(),
      manifest: settings.manifest,
      revalidations: Arc::new(Mutex::new(JoinSet::new())),
    }
  }

  /// Name of the cache the current version reads and writes.
  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  /// Route a request through the strategy for its class.
  pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
    match self.policy.classify(&request.url) {
      RequestClass::Api => self.network_first(request).await,
      RequestClass::StaticAsset if request.method == reqwest::Method::GET => {
        self.stale_while_revalidate(request).await
      }
      // Only GETs are cacheable; anything else just goes to the network
      RequestClass::StaticAsset => self.network_first(request).await,
    }
  }

  /// Issue the call and return whatever came back, whatever its status.
  async fn network_first(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
    let url = request.url.clone();
    match self.transport.send(request).await {
      Ok(response) => Ok(response),
      Err(TransportError::Unreachable(reason)) => {
        debug!(url = %url, %reason, "network unreachable");
        Err(FetchError::Offline(reason))
      }
      Err(TransportError::Invalid(reason)) => Err(FetchError::InvalidRequest(reason)),
      Err(TransportError::Protocol(reason)) => Err(FetchError::Protocol(reason)),
    }
  }

  async fn stale_while_revalidate(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
    let cached = match self
      .assets
      .lookup_asset(&self.cache_name, request.url.as_str())
    {
      Ok(found) => found.and_then(asset_to_response),
      Err(e) => {
        warn!(error = %e, "asset cache lookup failed, going to network");
        None
      }
    };

    match cached {
      Some(response) => {
        debug!(url = %request.url, "serving cached asset");
        self.spawn_revalidation(request);
        Ok(response)
      }
      None => {
        let url = request.url.clone();
        let response = self.network_first(request).await?;
        store_if_cacheable(
          self.assets.as_ref(),
          &self.cache_name,
          &self.origin,
          &url,
          &response,
        );
        Ok(response)
      }
    }
  }

  fn spawn_revalidation(&self, request: HttpRequest) {
    let transport = Arc::clone(&self.transport);
    let assets = Arc::clone(&self.assets);
    let cache_name = self.cache_name.clone();
    let origin = self.origin.clone();

    let task = async move {
      let url = request.url.clone();
      match transport.send(request).await {
        Ok(response) => store_if_cacheable(assets.as_ref(), &cache_name, &origin, &url, &response),
        Err(e) => debug!(url = %url, error = %e, "background revalidation failed"),
      }
    };

    match self.revalidations.lock() {
      Ok(mut set) => {
        // Reap whatever already finished so the set does not grow forever
        while set.try_join_next().is_some() {}
        set.spawn(task);
      }
      Err(_) => {
        tokio::spawn(task);
      }
    }
  }

  /// Wait for every background revalidation started so far.
  pub async fn settle(&self) {
    let mut pending = match self.revalidations.lock() {
      Ok(mut set) => std::mem::take(&mut *set),
      Err(_) => return,
    };
    while pending.join_next().await.is_some() {}
  }

  /// Seed the current cache with the install manifest.
  ///
  /// All-or-nothing: if any asset fails to fetch, nothing is written.
  pub async fn install(&self) -> Result<usize, FetchError> {
    let mut fetched = Vec::with_capacity(self.manifest.len());

    for path in &self.manifest {
      let url = self
        .origin
        .join(path)
        .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", path, e)))?;
      let response = self.network_first(HttpRequest::get(url.clone())).await?;
      if !response.is_success() {
        return Err(FetchError::Install {
          url: url.to_string(),
          status: response.status,
        });
      }
      fetched.push(response_to_asset(&url, &response));
    }

    self.assets.store_assets(&self.cache_name, &fetched)?;
    info!(cache = %self.cache_name, count = fetched.len(), "installed static assets");
    Ok(fetched.len())
  }

  /// Drop every cache that is not the current version. Returns the deleted names.
  pub fn activate(&self) -> Result<Vec<String>, FetchError> {
    let allow_list = [self.cache_name.as_str()];
    let mut deleted = Vec::new();

    for name in self.assets.cache_names()? {
      if !allow_list.contains(&name.as_str()) {
        self.assets.delete_cache(&name)?;
        info!(cache = %name, "deleted outdated asset cache");
        deleted.push(name);
      }
    }

    self.assets.open_cache(&self.cache_name)?;
    Ok(deleted)
  }

  /// Whether a response may go into the asset cache: 2xx, same origin, not redirected.
  pub fn is_cacheable(&self, response: &HttpResponse) -> bool {
    is_cacheable(&self.origin, response)
  }
}

fn is_cacheable(origin: &Url, response: &HttpResponse) -> bool {
  response.is_success() && !response.redirected && response.url.origin() == origin.origin()
}

fn store_if_cacheable(
  assets: &dyn AssetCache,
  cache_name: &str,
  origin: &Url,
  url: &Url,
  response: &HttpResponse,
) {
  if !is_cacheable(origin, response) {
    debug!(url = %url, status = response.status, "response not cacheable, passing through");
    return;
  }
  if let Err(e) = assets.store_assets(cache_name, &[response_to_asset(url, response)]) {
    warn!(url = %url, error = %e, "failed to update asset cache");
  }
}

fn response_to_asset(url: &Url, response: &HttpResponse) -> CachedAsset {
  CachedAsset {
    url: url.to_string(),
    status: response.status,
    final_url: response.url.to_string(),
    headers: response.headers.clone(),
    body: response.body.clone(),
  }
}

fn asset_to_response(asset: CachedAsset) -> Option<HttpResponse> {
  let url = Url::parse(&asset.final_url).ok()?;
  Some(HttpResponse {
    status: asset.status,
    url,
    redirected: false,
    headers: asset.headers,
    body: asset.body,
  })
}
