//! Offline-resilience core for the requisition approval client.
//!
//! Writes go to the server when it is reachable and into a durable outbox when
//! it is not; the outbox is replayed in order once connectivity returns. Reads
//! are served network-first from a local entity cache, and static assets are
//! served stale-while-revalidate from versioned caches.

pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod event;
pub mod intercept;
pub mod realtime;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;
