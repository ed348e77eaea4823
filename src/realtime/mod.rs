//! Best-effort push channel.
//!
//! A STOMP subscriber over WebSocket that refreshes cached entities when the
//! server announces changes. Nothing in the write path depends on it.

mod channel;
mod refresh;
mod stomp;

pub use channel::{ChannelSettings, ChannelState, Handler, RealtimeChannel};
pub use refresh::EntityRefresher;
pub use stomp::{Frame, HeartBeat};
