//! Connection state and reconnect policy for the push channel.

use std::time::Duration;

/// Why a push channel is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Never opened, or closed through [`super::PushChannel::close`].
    Requested,
    /// The server rejected the session (close code 1008 or a 401/403
    /// handshake). Only an explicit `open()` starts a new attempt.
    AuthFailure,
    /// The reconnect budget ran out; the client should show itself offline.
    RetriesExhausted,
}

/// Connection state for the push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed(CloseReason),
    Connecting,
    Open,
    /// Waiting out the backoff before reconnect attempt number `attempt`.
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }

    /// Open or on its way there.
    pub fn is_active(&self) -> bool {
        self.is_open() || self.is_connecting()
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ConnectionState::Closed(CloseReason::AuthFailure))
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Closed(CloseReason::Requested)
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
    /// How long a WebSocket handshake may take before it counts as failed
    pub connect_timeout_ms: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.initial_delay_ms as f32 * self.backoff_multiplier.powi(exponent);
        let capped = if delay.is_finite() {
            (delay as u32).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(u64::from(capped))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.connect_timeout_ms))
    }

    /// Whether another attempt is allowed after `attempt` consecutive failures.
    pub fn may_retry(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt < self.max_attempts
    }
}
