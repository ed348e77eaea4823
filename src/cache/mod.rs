//! Read-through cache of server-known entities.
//!
//! This module keeps the `entities` partition of the local store in step with the server:
//! - Caches entities keyed by their server id, overwritten wholesale on every refresh
//! - Fetches network-first; serves the last cached copy when the network is unreachable
//! - Application errors from the server are never masked by cached data

mod layer;
mod traits;

pub use layer::EntityCache;
pub use traits::{CacheResult, CacheSource, CachedEntity};
