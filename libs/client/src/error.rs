use krpc_fabric::schema::connection_response::Status;
use thiserror::Error;

/// Error produced by a constructor registered for a server-defined exception.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Handshake and transport failures while establishing or using a session
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {address}: {source}")]
    ConnectFailed {
        address: String,
        #[source]
        source: krpc_fabric::Error,
    },

    #[error("Could not resolve {0}")]
    Unresolved(String),

    #[error("RPC and stream port numbers are the same ({0})")]
    SamePort(u16),

    #[error("Handshake failed: {0}")]
    Handshake(#[source] krpc_fabric::Error),

    #[error("Connection rejected by server ({status:?}): {message}")]
    Rejected { status: Status, message: String },

    #[error("Connection closed")]
    Closed,
}

/// Errors reported by the server for a procedure call
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Null argument: {0}")]
    NullArgument(String),

    #[error("Argument out of range: {0}")]
    ArgumentOutOfRange(String),

    /// A server-defined exception with a registered constructor
    #[error("{service}.{name}: {source}")]
    Service {
        service: String,
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("{0}")]
    Failed(String),

    #[error("Failed to invoke call: {0}")]
    Transport(#[source] krpc_fabric::Error),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl RpcError {
    /// Server-side message carried by the error, stack trace included
    pub fn message(&self) -> String {
        match self {
            Self::InvalidOperation(msg)
            | Self::InvalidArgument(msg)
            | Self::NullArgument(msg)
            | Self::ArgumentOutOfRange(msg)
            | Self::Failed(msg)
            | Self::MalformedResponse(msg) => msg.clone(),
            Self::Service { source, .. } => source.to_string(),
            Self::Transport(e) => e.to_string(),
        }
    }
}

/// Malformed bytes, arity mismatches and values that do not fit their descriptor
#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("Unexpected end of data while decoding {0}")]
    Truncated(&'static str),

    #[error("{0} trailing bytes after decoded value")]
    TrailingBytes(usize),

    #[error("Varint does not fit in {0}")]
    Overflow(&'static str),

    #[error("Tuple has wrong number of elements. Expected {expected}, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Cannot encode {actual} value as {expected}")]
    TypeMismatch { expected: String, actual: &'static str },

    #[error("Invalid UTF-8 in string: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Malformed message: {0}")]
    Message(#[from] prost::DecodeError),

    #[error("Invalid type descriptor: {0}")]
    InvalidType(String),
}

/// Operations on unknown or removed streams
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Stream {0} does not exist")]
    NotFound(u64),

    #[error("Stream {0} has no value")]
    NoValue(u64),

    #[error("Stream {0} was removed")]
    Removed(u64),
}
