use crate::error::Result;

pub mod tcp;

pub use self::tcp::{TcpTransport, TcpTransportBuilder, TcpTransportListener};

/// A single connection that moves length-delimited frames
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Write `frame` behind its length prefix
    async fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Read the next frame body
    async fn receive(&mut self) -> Result<Vec<u8>>;

    async fn close(&mut self) -> Result<()>;
}
