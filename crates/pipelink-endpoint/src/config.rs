use std::time::Duration;

use pipelink_frame::MessageConfig;
use pipelink_transport::PipeNamespace;

/// Settle delay before the single retry of a busy channel creation.
pub const DEFAULT_CREATE_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Pause after forcibly disconnecting a peer, letting the OS finish teardown.
pub const DEFAULT_RESET_SETTLE_DELAY: Duration = Duration::from_millis(50);
/// Pause before a registry connect, letting a prior disconnect settle.
pub const DEFAULT_CONNECT_SETTLE_DELAY: Duration = Duration::from_millis(100);
/// How often a pending listen checks whether its endpoint was closed.
pub const DEFAULT_ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Behaviour shared by every endpoint a registry creates.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Where channel names are mapped on this platform.
    pub namespace: PipeNamespace,
    /// Message size limit and stream timeouts.
    pub message: MessageConfig,
    /// Delay before retrying a creation that failed because the name was busy.
    pub create_retry_delay: Duration,
    /// Delay after disconnecting a peer in `reset_for_new_connection`.
    pub reset_settle_delay: Duration,
    /// Delay before a registry-level connect.
    pub connect_settle_delay: Duration,
    /// Cancellation polling interval while waiting for a peer.
    pub accept_poll_interval: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            namespace: PipeNamespace::default(),
            message: MessageConfig::default(),
            create_retry_delay: DEFAULT_CREATE_RETRY_DELAY,
            reset_settle_delay: DEFAULT_RESET_SETTLE_DELAY,
            connect_settle_delay: DEFAULT_CONNECT_SETTLE_DELAY,
            accept_poll_interval: DEFAULT_ACCEPT_POLL_INTERVAL,
        }
    }
}

impl EndpointConfig {
    /// Override the pipe namespace.
    pub fn with_namespace(mut self, namespace: PipeNamespace) -> Self {
        self.namespace = namespace;
        self
    }

    /// Impose a maximum message size on sends and receives.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.message.max_payload_size = Some(max);
        self
    }

    /// Apply a read timeout to connected streams.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.message.read_timeout = timeout;
        self
    }

    /// Apply a write timeout to connected streams.
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.message.write_timeout = timeout;
        self
    }

    /// Override every settle delay at once. Mostly useful to speed up tests.
    pub fn with_settle_delays(mut self, delay: Duration) -> Self {
        self.create_retry_delay = delay;
        self.reset_settle_delay = delay;
        self.connect_settle_delay = delay;
        self
    }

    /// Override the accept polling interval.
    pub fn with_accept_poll_interval(mut self, interval: Duration) -> Self {
        self.accept_poll_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_delays() {
        let config = EndpointConfig::default();
        assert_eq!(config.create_retry_delay, Duration::from_millis(100));
        assert_eq!(config.reset_settle_delay, Duration::from_millis(50));
        assert_eq!(config.connect_settle_delay, Duration::from_millis(100));
        assert!(config.message.max_payload_size.is_none());
    }

    #[test]
    fn builders_override_fields() {
        let config = EndpointConfig::default()
            .with_max_message_size(1024)
            .with_read_timeout(Some(Duration::from_secs(1)))
            .with_settle_delays(Duration::ZERO)
            .with_accept_poll_interval(Duration::from_millis(1));

        assert_eq!(config.message.max_payload_size, Some(1024));
        assert_eq!(config.message.read_timeout, Some(Duration::from_secs(1)));
        assert_eq!(config.connect_settle_delay, Duration::ZERO);
        assert_eq!(config.accept_poll_interval, Duration::from_millis(1));
    }
}
