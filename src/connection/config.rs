//! Stream connection configuration.

use std::time::Duration;

use crate::traits::StreamTarget;

/// Configuration for one stream connection.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Endpoint the connection subscribes to. `connect()` fails fast,
    /// without a network attempt, when this is absent.
    pub target: Option<StreamTarget>,
    /// Connect immediately on creation.
    pub auto_connect: bool,
    /// Reconnection attempts before the connection gives up.
    pub max_reconnect_attempts: u8,
    /// Base reconnection delay; attempt `n` waits `base * n` (linear backoff).
    pub reconnect_delay: Duration,
    /// Trailing events retained for display/audit. `None` keeps everything.
    pub history_limit: Option<usize>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            target: None,
            auto_connect: true,
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_millis(2000),
            history_limit: Some(50),
        }
    }
}

impl StreamConfig {
    /// Configuration pointed at the given endpoint, with defaults otherwise.
    pub fn for_target(target: StreamTarget) -> Self {
        Self {
            target: Some(target),
            ..Self::default()
        }
    }

    /// Disable or enable connecting on creation.
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Override the reconnection attempt limit.
    pub fn with_max_reconnect_attempts(mut self, attempts: u8) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Override the base reconnection delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Override the retained event history bound.
    pub fn with_history_limit(mut self, limit: Option<usize>) -> Self {
        self.history_limit = limit;
        self
    }
}
