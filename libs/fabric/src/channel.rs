use std::net::SocketAddr;

use prost::Message;

use crate::codec::Codec;
use crate::error::Result;
use crate::transport::{TcpTransport, TcpTransportBuilder, Transport};

/// Typed message pipe over one framed connection
///
/// Every frame carries exactly one protocol buffer message.
pub struct Channel<C> {
    transport: Box<dyn Transport>,
    codec: C,
}

impl<C: Codec> Channel<C> {
    pub fn from_transport(transport: impl Transport + 'static, codec: C) -> Self {
        Self {
            transport: Box::new(transport),
            codec,
        }
    }

    /// Connect with default transport settings
    pub async fn tcp(addr: SocketAddr, codec: C) -> Result<Self> {
        Self::tcp_with(TcpTransport::builder().address(addr), codec).await
    }

    /// Connect using a configured builder (timeouts, frame limit)
    pub async fn tcp_with(builder: TcpTransportBuilder, codec: C) -> Result<Self> {
        Ok(Self::from_transport(builder.connect().await?, codec))
    }

    pub async fn send<M: Message>(&mut self, message: &M) -> Result<()> {
        let frame = self.codec.encode(message)?;
        self.transport.send(&frame).await
    }

    pub async fn receive<M: Message + Default>(&mut self) -> Result<M> {
        let frame = self.transport.receive().await?;
        self.codec.decode(&frame)
    }

    /// Send `request` and read the next message as its reply
    ///
    /// The protocol has no correlation ids, so callers must not interleave
    /// requests on the same channel.
    pub async fn request<Req, Res>(&mut self, request: &Req) -> Result<Res>
    where
        Req: Message,
        Res: Message + Default,
    {
        self.send(request).await?;
        self.receive().await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}
