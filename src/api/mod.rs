//! Client for the remote requisition API.

mod client;
mod types;

pub use client::ApiClient;
pub use types::{entity_id, error_message, id_string, unwrap_envelope, RemoteApi};
