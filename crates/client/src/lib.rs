//! Synonymer client core
//!
//! Session tracking, a read cache with request coalescing, the realtime push
//! channel that keeps the cache honest, and fuzzy ranking of search results.
//! Presentation layers (the bundled `synonymer` CLI included) sit on top of
//! [`AppContext`].

pub mod api_client;
pub mod config;
pub mod context;
pub mod explanations;
pub mod fuzzy;
pub mod gate;
pub mod notify;
pub mod push;
pub mod query_cache;
pub mod session;

pub use api_client::ApiClient;
pub use config::ClientConfig;
pub use context::AppContext;
pub use explanations::{keys, ExplanationQueries};
pub use gate::SessionGate;
pub use notify::{Level, Notification, Notifier};
pub use push::{CloseReason, ConnectionState, PushChannel, ReconnectConfig};
pub use query_cache::{CacheEvent, EntryState, QueryCache, QueryKey, QueryOptions, Subscription};
pub use session::{AuthStatus, SessionStore};
