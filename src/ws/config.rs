//! WebSocket client configuration.

use std::time::Duration;

/// What happens to tracked subscriptions after a supervised reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResubscribePolicy {
    /// Send one subscribe frame with every tracked symbol on the new socket.
    #[default]
    Replay,
    /// Forget tracked symbols; the caller subscribes again.
    Clear,
}

/// Configuration for WebSocket connections.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Upper bound on dialing. `None` leaves it to the caller's cancellation.
    pub dial_timeout: Option<Duration>,
    /// Upper bound on login/subscribe acknowledgement waits.
    /// `None` leaves it to the caller's cancellation.
    pub ack_timeout: Option<Duration>,
    /// Bound on the login exchange of a supervised reconnect, which has no caller.
    pub handshake_timeout: Duration,
    /// Initial backoff duration for reconnection.
    pub initial_backoff: Duration,
    /// Maximum backoff duration for reconnection.
    pub max_backoff: Duration,
    /// Maximum number of read loop restarts (None = infinite).
    pub max_reconnect_attempts: Option<u32>,
    /// Capacity of the quote channel. A full channel stalls the read loop.
    pub quote_buffer: usize,
    /// Subscription handling after a reconnect.
    pub resubscribe: ResubscribePolicy,
    /// Stop the read loop when the acknowledgement of the unsubscribe that
    /// removed the last symbol arrives.
    pub close_when_unsubscribed: bool,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            dial_timeout: None,
            ack_timeout: None,
            handshake_timeout: Duration::from_secs(10),
            // Constant 5s backoff, 5 restarts.
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(5),
            max_reconnect_attempts: Some(5),
            quote_buffer: 256,
            resubscribe: ResubscribePolicy::Replay,
            close_when_unsubscribed: true,
        }
    }
}

impl WsConfig {
    /// Create a new configuration builder.
    pub fn builder() -> WsConfigBuilder {
        WsConfigBuilder::new()
    }

    /// Backoff before restart number `attempt` (1-based).
    ///
    /// Doubles from `initial_backoff` up to `max_backoff`; equal bounds give a
    /// constant delay. `None` once the attempt budget is spent.
    pub fn backoff_for(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_reconnect_attempts {
            if attempt > max {
                return None;
            }
        }

        let base = self.initial_backoff.as_millis() as u64;
        let max = self.max_backoff.as_millis() as u64;
        let multiplier = 2u64.saturating_pow(attempt.saturating_sub(1));
        let backoff_ms = base.saturating_mul(multiplier).min(max.max(base));
        Some(Duration::from_millis(backoff_ms))
    }
}

/// Builder for [`WsConfig`].
#[derive(Debug, Clone, Default)]
pub struct WsConfigBuilder {
    config: WsConfig,
}

impl WsConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: WsConfig::default(),
        }
    }

    /// Bound the dial.
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.config.dial_timeout = Some(timeout);
        self
    }

    /// Bound acknowledgement waits.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = Some(timeout);
        self
    }

    /// Bound the login exchange of supervised reconnects.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set the reconnection backoff parameters.
    pub fn reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.initial_backoff = initial;
        self.config.max_backoff = max;
        self
    }

    /// Use the same delay before every restart.
    pub fn constant_backoff(self, delay: Duration) -> Self {
        self.reconnect_backoff(delay, delay)
    }

    /// Set maximum reconnection attempts.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = Some(attempts);
        self
    }

    /// Retry forever.
    pub fn unlimited_reconnects(mut self) -> Self {
        self.config.max_reconnect_attempts = None;
        self
    }

    /// Set the quote channel capacity (at least 1).
    pub fn quote_buffer(mut self, capacity: usize) -> Self {
        self.config.quote_buffer = capacity.max(1);
        self
    }

    /// Set the subscription policy after reconnects.
    pub fn resubscribe(mut self, policy: ResubscribePolicy) -> Self {
        self.config.resubscribe = policy;
        self
    }

    /// Whether removing the last subscription ends the stream.
    pub fn close_when_unsubscribed(mut self, close: bool) -> Self {
        self.config.close_when_unsubscribed = close;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> WsConfig {
        self.config
    }
}
