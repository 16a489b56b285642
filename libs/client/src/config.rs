use std::time::Duration;

use krpc_fabric::transport::tcp::DEFAULT_MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::error::Result;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 50000;
pub const DEFAULT_STREAM_PORT: u16 = 50001;

/// Parameters for opening a [`Connection`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Display name shown by the server
    pub name: String,
    pub address: String,
    pub rpc_port: u16,
    pub stream_port: u16,
    /// Applies to each TCP connect, not to the handshake
    pub connect_timeout: Option<Duration>,
    pub max_frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: DEFAULT_ADDRESS.to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            stream_port: DEFAULT_STREAM_PORT,
            connect_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn rpc_port(mut self, port: u16) -> Self {
        self.rpc_port = port;
        self
    }

    pub fn stream_port(mut self, port: u16) -> Self {
        self.stream_port = port;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Open both sockets and perform the handshake
    pub async fn connect(&self) -> Result<Connection> {
        Connection::connect_with(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_server_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.rpc_port, 50000);
        assert_eq!(config.stream_port, 50001);
        assert_eq!(config.name, "");
        assert!(config.connect_timeout.is_none());
    }

    #[test]
    fn setters_chain() {
        let config = ConnectionConfig::new()
            .name("Jeb")
            .address("localhost")
            .rpc_port(1000)
            .stream_port(1001)
            .connect_timeout(Duration::from_secs(2));
        assert_eq!(config.name, "Jeb");
        assert_eq!(config.address, "localhost");
        assert_eq!((config.rpc_port, config.stream_port), (1000, 1001));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(2)));
    }
}
