//! Realtime push channel.
//!
//! The backend announces finished background work over a WebSocket at
//! `/api/ws`. [`PushChannel`] keeps one connection alive while asked to,
//! reconnects with bounded backoff, and turns `explanation_ready` frames
//! into query cache invalidations.

mod channel;
mod connection;

pub use channel::PushChannel;
pub use connection::{CloseReason, ConnectionState, ReconnectConfig};
