//! Offline write queue.
//!
//! Changes made while the server is unreachable are recorded in the `outbox`
//! partition and replayed in order once connectivity returns:
//! - `MutationQueue` decides between a direct call and queuing, and drains the outbox
//! - `IdMap` translates placeholder ids of offline creates to server ids
//! - `Backoff` spaces out retries when a drain halts while still online

mod backoff;
mod idmap;
mod mutation;
mod outbox;
mod queue;

pub use backoff::Backoff;
pub use idmap::IdMap;
pub use mutation::{is_placeholder, placeholder_id, MutationKind, QueuedMutation, PLACEHOLDER_PREFIX};
pub use outbox::Outbox;
pub use queue::{DrainHalt, DrainOutcome, DrainReport, MutationQueue, SubmitOutcome};
