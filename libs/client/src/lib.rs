//! kRPC Client - Runtime for talking to a kRPC server
//!
//! A [`Connection`] owns two sockets: one for request/response procedure
//! calls and one on which the server pushes stream updates. Arguments and
//! return values are encoded by [`encoder`] as directed by a [`Type`]
//! descriptor, which generated service stubs supply with every call.
//!
//! # Example
//!
//! ```no_run
//! use krpc_client::{Connection, Type, Value};
//!
//! # async fn example() -> krpc_client::Result<()> {
//! let conn = Connection::connect("example", "127.0.0.1", 50000, 50001).await?;
//! let name: String = conn.krpc().get_client_name().await?;
//!
//! let call = conn.build_call(
//!     "TestService",
//!     "Int32ToString",
//!     &[(Value::SInt32(42), Type::SInt32)],
//! )?;
//! let stream = conn.add_stream::<String>(call, Type::String, false).await?;
//! println!("{} sees {}", name, stream.get().await?);
//! stream.remove().await?;
//! conn.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod encoder;
pub mod error;
pub mod event;
pub mod exceptions;
pub mod remote;
pub mod services;
pub mod stream;
mod stream_manager;
pub mod types;
pub mod value;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionRef};
pub use error::{ConnectionError, EncodingError, Error, Result, RpcError, StreamError};
pub use event::Event;
pub use krpc_fabric::schema;
pub use remote::{RemoteEnum, RemoteObject};
pub use stream::Stream;
pub use stream_manager::CallbackId;
pub use types::Type;
pub use value::{FromValue, Value};
