//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Default topic-delivery endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://pubsub-edge.twitch.tv/v1";

/// Retry delay policy for (re)establishing a connection.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First delay after a failure.
    pub base: Duration,
    /// Ceiling for the delay.
    pub maximum: Duration,
    /// Growth factor per consecutive failure.
    pub factor: u32,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            maximum: Duration::from_secs(180),
            factor: 2,
            jitter: true,
        }
    }
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Endpoint every connection opens.
    pub endpoint: String,
    /// Optional outbound HTTP proxy (`http://host:port`).
    pub proxy: Option<String>,
    /// Maximum topics per connection.
    pub topics_limit: usize,
    /// Maximum number of connections.
    pub max_connections: usize,
    /// Time between keepalive pings.
    pub ping_interval: Duration,
    /// Time allowed for a PONG after a PING.
    pub ping_timeout: Duration,
    /// Upper bound for a single receive poll.
    pub recv_timeout: Duration,
    /// Upper bound for a single connect attempt.
    pub connect_timeout: Duration,
    /// Time `stop` waits for the handling loop before aborting it.
    pub stop_timeout: Duration,
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            proxy: None,
            topics_limit: 50,
            max_connections: 8,
            ping_interval: Duration::from_secs(180),
            ping_timeout: Duration::from_secs(10),
            recv_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(2),
            backoff: BackoffConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Total number of topics the pool can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.topics_limit.saturating_mul(self.max_connections)
    }

    /// Check the configuration for values the pool cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<(), PoolError> {
        let invalid = |msg: &str| -> Result<(), PoolError> {
            Err(PoolError::InvalidConfig(msg.to_string()))
        };

        if self.endpoint.is_empty() {
            return invalid("endpoint cannot be empty");
        }
        if self.topics_limit == 0 {
            return invalid("topics_limit must be at least 1");
        }
        if self.max_connections == 0 {
            return invalid("max_connections must be at least 1");
        }
        if self.ping_interval.is_zero() || self.ping_timeout.is_zero() {
            return invalid("ping interval and timeout must be positive");
        }
        if self.recv_timeout.is_zero() {
            return invalid("recv_timeout must be positive");
        }
        if self.backoff.base.is_zero() || self.backoff.base > self.backoff.maximum {
            return invalid("backoff base must be positive and not above the maximum");
        }
        if self.backoff.factor == 0 {
            return invalid("backoff factor must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.topics_limit, 50);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.capacity(), 400);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = PoolConfig {
            topics_limit: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PoolError::InvalidConfig(_))));

        let config = PoolConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_backoff() {
        let mut config = PoolConfig::default();
        config.backoff.base = Duration::from_secs(600);
        assert!(config.validate().is_err());
    }
}
