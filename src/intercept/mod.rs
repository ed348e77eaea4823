//! Request interception layer.
//!
//! Sits between the application and the network and picks a strategy per request:
//! - API calls (path prefix, `/api/` by default) go network-first and surface a
//!   distinguishable offline error when nothing comes back
//! - Static assets are served stale-while-revalidate from a versioned cache

mod layer;
mod transport;

pub use layer::{AssetSettings, Interceptor, RequestClass, RoutePolicy};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
