use thiserror::Error;

/// Failures of the framed transport and the message codec
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Codec(#[from] prost::DecodeError),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Bad length prefix
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("{0} timeout exceeded")]
    Timeout(&'static str),

    #[error("No address to connect to")]
    MissingAddress,
}

pub type Result<T> = std::result::Result<T, Error>;
