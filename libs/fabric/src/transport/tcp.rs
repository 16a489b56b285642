use std::net::SocketAddr;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{sink, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Largest frame accepted unless the builder says otherwise (100MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// A 32-bit varint never needs more than 5 bytes
const MAX_VARINT32_BYTES: usize = 5;

/// TCP transport with varint length-prefix framing
///
/// Every message is sent as `varint32(length) || payload`, the framing
/// used by protocol buffer delimited streams.
pub struct TcpTransport {
    stream: BufStream<TcpStream>,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
    max_frame_size: usize,
}

impl TcpTransport {
    /// Connect to a remote TCP address with no timeouts
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::builder().address(addr).connect().await
    }

    /// Create a builder for configuring the transport
    pub fn builder() -> TcpTransportBuilder {
        TcpTransportBuilder::new()
    }

    /// Create from an existing TcpStream
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream: BufStream::new(stream),
            send_timeout: None,
            receive_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

async fn read_length_prefix(stream: &mut BufStream<TcpStream>) -> Result<usize> {
    let mut length = 0u64;
    for index in 0..MAX_VARINT32_BYTES {
        let byte = stream.read_u8().await.map_err(closed_on_eof)?;
        length |= u64::from(byte & 0x7f) << (7 * index);
        if byte & 0x80 == 0 {
            return u32::try_from(length)
                .map(|length| length as usize)
                .map_err(|_| {
                    Error::InvalidFrame(format!("Length prefix {} overflows 32 bits", length))
                });
        }
    }
    Err(Error::InvalidFrame(format!(
        "Length prefix longer than {} bytes",
        MAX_VARINT32_BYTES
    )))
}

fn closed_on_eof(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        e.into()
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let max = self.max_frame_size.min(u32::MAX as usize);
        if bytes.len() > max {
            return Err(Error::FrameTooLarge {
                size: bytes.len(),
                max,
            });
        }

        let send_timeout = self.send_timeout;
        let stream = &mut self.stream;
        let send_op = async move {
            let mut frame = BytesMut::with_capacity(MAX_VARINT32_BYTES + bytes.len());
            prost::encoding::encode_varint(bytes.len() as u64, &mut frame);
            frame.put_slice(bytes);

            stream.write_all(&frame).await?;
            stream.flush().await?;
            trace!(len = bytes.len(), "sent frame");

            Ok::<(), Error>(())
        };

        match send_timeout {
            Some(timeout) => tokio::time::timeout(timeout, send_op)
                .await
                .map_err(|_| Error::Timeout("Send"))?,
            None => send_op.await,
        }
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        let receive_timeout = self.receive_timeout;
        let max_frame_size = self.max_frame_size;
        let stream = &mut self.stream;
        let receive_op = async move {
            let len = read_length_prefix(stream).await?;

            // Consume the body so the next read starts on a frame boundary
            if len > max_frame_size {
                let skipped = tokio::io::copy(&mut (&mut *stream).take(len as u64), &mut sink())
                    .await
                    .map_err(closed_on_eof)?;
                if skipped < len as u64 {
                    return Err(Error::ConnectionClosed);
                }
                debug!(len, max_frame_size, "discarded oversized frame");
                return Err(Error::FrameTooLarge {
                    size: len,
                    max: max_frame_size,
                });
            }

            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).await.map_err(closed_on_eof)?;
            trace!(len, "received frame");

            Ok::<Vec<u8>, Error>(buf)
        };

        match receive_timeout {
            Some(timeout) => tokio::time::timeout(timeout, receive_op)
                .await
                .map_err(|_| Error::Timeout("Receive"))?,
            None => receive_op.await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// TCP listener for accepting incoming connections
pub struct TcpTransportListener {
    listener: TcpListener,
}

impl TcpTransportListener {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Accept an incoming connection
    pub async fn accept(&self) -> Result<(TcpTransport, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        Ok((TcpTransport::from_stream(stream), addr))
    }

    /// Get the local address this listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }
}

/// Builder for configuring TCP transport
pub struct TcpTransportBuilder {
    address: Option<SocketAddr>,
    connect_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    receive_timeout: Option<Duration>,
    max_frame_size: usize,
}

impl Default for TcpTransportBuilder {
    fn default() -> Self {
        Self {
            address: None,
            connect_timeout: None,
            send_timeout: None,
            receive_timeout: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl TcpTransportBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address to connect to
    pub fn address(mut self, addr: SocketAddr) -> Self {
        self.address = Some(addr);
        self
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set the receive timeout
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    /// Set the largest frame either side may send
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Connect with the configured settings
    pub async fn connect(self) -> Result<TcpTransport> {
        let addr = self.address.ok_or(Error::MissingAddress)?;

        let connect_op = TcpStream::connect(addr);

        let stream = if let Some(timeout) = self.connect_timeout {
            tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::Timeout("Connect"))??
        } else {
            connect_op.await?
        };
        stream.set_nodelay(true)?;

        Ok(TcpTransport {
            stream: BufStream::new(stream),
            send_timeout: self.send_timeout,
            receive_timeout: self.receive_timeout,
            max_frame_size: self.max_frame_size,
        })
    }
}
