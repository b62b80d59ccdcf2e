//! Server configuration.

use std::{net::SocketAddr, time::Duration};

use tickframe_proto::MAX_MESSAGE_SIZE;

use crate::{error::ServerError, tls::TlsMaterial};

/// Highest supported tick rate. Faster rates leave no time for the callback.
pub const MAX_TICK_RATE: u32 = 1000;

/// Runtime configuration for a [`crate::Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Tick scheduler frequency in firings per second
    pub tick_rate: u32,
    /// Certificate and key used for the TLS handshake
    pub tls: TlsMaterial,
    /// Maximum concurrent connections, counting handshakes in flight.
    /// Further connections are refused before the handshake completes.
    pub max_connections: usize,
    /// Connections silent for this long are closed by the transport
    pub idle_timeout: Duration,
    /// Interval for transport keep-alive packets, `None` to disable
    pub keep_alive_interval: Option<Duration>,
    /// Accept unreliable datagrams from clients
    pub enable_datagrams: bool,
    /// Datagram handlers running at once per connection. Datagrams arriving
    /// while every slot is busy are dropped.
    pub max_inflight_datagrams: usize,
    /// Largest inbound message read from one stream
    pub max_message_size: usize,
    /// Upper bound on waiting for close frames to flush during `stop`
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            tick_rate: 60,
            tls: TlsMaterial::default(),
            max_connections: 10_000,
            idle_timeout: Duration::from_secs(5 * 60),
            keep_alive_interval: None,
            enable_datagrams: true,
            max_inflight_datagrams: 64,
            max_message_size: MAX_MESSAGE_SIZE,
            drain_timeout: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Configuration bound to an ephemeral loopback port. Used by tests and
    /// local tooling.
    pub fn localhost() -> Self {
        Self { bind_address: "127.0.0.1:0".to_string(), ..Self::default() }
    }

    /// Time between two tick firings.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate.max(1)
    }

    /// Parsed bind address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        self.bind_address.parse().map_err(|e| {
            ServerError::Config(format!("invalid bind address '{}': {e}", self.bind_address))
        })
    }

    /// Check every field that would otherwise fail later at runtime.
    pub fn validate(&self) -> Result<(), ServerError> {
        self.socket_addr()?;

        if self.tick_rate == 0 || self.tick_rate > MAX_TICK_RATE {
            return Err(ServerError::Config(format!(
                "tick rate must be within 1..={MAX_TICK_RATE}, got {}",
                self.tick_rate
            )));
        }

        if self.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be positive".to_string()));
        }

        if self.max_inflight_datagrams == 0 {
            return Err(ServerError::Config("max_inflight_datagrams must be positive".to_string()));
        }

        if self.max_message_size == 0 || self.max_message_size > MAX_MESSAGE_SIZE {
            return Err(ServerError::Config(format!(
                "max_message_size must be within 1..={MAX_MESSAGE_SIZE}, got {}",
                self.max_message_size
            )));
        }

        if self.idle_timeout.is_zero() {
            return Err(ServerError::Config("idle_timeout must be positive".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_period(), Duration::from_secs(1) / 60);
    }

    #[test]
    fn rejects_zero_tick_rate() {
        let config = ServerConfig { tick_rate: 0, ..ServerConfig::default() };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn rejects_excessive_tick_rate() {
        let config = ServerConfig { tick_rate: MAX_TICK_RATE + 1, ..ServerConfig::default() };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn rejects_invalid_bind_address() {
        let config =
            ServerConfig { bind_address: "invalid:address:format".to_string(), ..Default::default() };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn rejects_oversized_message_limit() {
        let config =
            ServerConfig { max_message_size: MAX_MESSAGE_SIZE + 1, ..ServerConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_datagram_slots() {
        let config = ServerConfig { max_inflight_datagrams: 0, ..ServerConfig::default() };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn localhost_uses_ephemeral_port() {
        let addr = ServerConfig::localhost().socket_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 0);
    }
}
