//! Realtime hub: in-memory pub/sub keyed `(app_id, channel)` over
//! WebSocket.

pub mod hub;
pub mod websocket;

pub use hub::{HubRegistry, RealtimeLimits};

// vim: ts=4
