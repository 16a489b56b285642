//! kRPC Fabric - Wire layer for the kRPC client
//!
//! Provides the TCP transport with varint length-prefix framing, the
//! protocol buffer codec, and the protocol's message schema.
//!
//! # Example
//!
//! ```no_run
//! use krpc_fabric::codec::ProtobufCodec;
//! use krpc_fabric::schema::{connection_request, ConnectionRequest, ConnectionResponse};
//! use krpc_fabric::Channel;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let addr = "127.0.0.1:50000".parse()?;
//! let mut channel = Channel::tcp(addr, ProtobufCodec).await?;
//!
//! let hello = ConnectionRequest {
//!     r#type: connection_request::Type::Rpc as i32,
//!     client_name: "example".to_string(),
//!     ..Default::default()
//! };
//! let response: ConnectionResponse = channel.request(&hello).await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod error;
pub mod schema;
pub mod transport;

// Re-exports for convenience
pub use channel::Channel;
pub use error::{Error, Result};
