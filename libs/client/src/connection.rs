//! Two-socket session with the server.
//!
//! The RPC socket carries strictly alternating requests and responses and is
//! guarded by a single async lock. The stream socket is owned by a background
//! reader task that feeds the [`StreamManager`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use krpc_fabric::codec::ProtobufCodec;
use krpc_fabric::schema::{self, connection_request, connection_response};
use krpc_fabric::transport::TcpTransport;
use krpc_fabric::Channel;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::ConnectionConfig;
use crate::encoder;
use crate::error::{ConnectionError, Result, RpcError};
use crate::event::Event;
use crate::exceptions::{ExceptionConstructor, ExceptionRegistry};
use crate::services::Krpc;
use crate::stream::Stream;
use crate::stream_manager::{CallbackId, StreamManager};
use crate::types::Type;
use crate::value::{FromValue, Value};

struct Shared {
    name: String,
    client_id: Vec<u8>,
    rpc: Mutex<Channel<ProtobufCodec>>,
    shutdown: CancellationToken,
    exceptions: Arc<ExceptionRegistry>,
    streams: StreamManager,
    reader: SyncMutex<Option<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// An open session with the server.
///
/// Cheap to clone; all clones share the same sockets. Dropping the last clone
/// (and every stream handle) shuts the session down.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

/// Non-owning reference to a connection, held by decoded remote objects.
#[derive(Clone, Default)]
pub struct ConnectionRef(Weak<Shared>);

impl ConnectionRef {
    /// A reference that never resolves to a connection
    pub fn detached() -> Self {
        Self(Weak::new())
    }

    /// The connection, if it is still alive
    pub fn upgrade(&self) -> Option<Connection> {
        self.0.upgrade().map(|shared| Connection { shared })
    }
}

impl fmt::Debug for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.upgrade() {
            Some(shared) => write!(f, "ConnectionRef({:?})", shared.name),
            None => f.write_str("ConnectionRef(detached)"),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.shared.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn resolve(address: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((address, port))
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ConnectionError::Unresolved(format!("{}:{}", address, port)).into())
}

async fn open_channel(addr: SocketAddr, config: &ConnectionConfig) -> Result<Channel<ProtobufCodec>> {
    let mut builder = TcpTransport::builder()
        .address(addr)
        .max_frame_size(config.max_frame_size);
    if let Some(timeout) = config.connect_timeout {
        builder = builder.connect_timeout(timeout);
    }
    Channel::tcp_with(builder, ProtobufCodec)
        .await
        .map_err(|source| {
            ConnectionError::ConnectFailed {
                address: addr.to_string(),
                source,
            }
            .into()
        })
}

async fn handshake(
    channel: &mut Channel<ProtobufCodec>,
    request: schema::ConnectionRequest,
) -> Result<schema::ConnectionResponse> {
    let response: schema::ConnectionResponse = channel
        .request(&request)
        .await
        .map_err(ConnectionError::Handshake)?;
    let status = connection_response::Status::try_from(response.status)
        .unwrap_or(connection_response::Status::MalformedMessage);
    if status != connection_response::Status::Ok {
        warn!("Server rejected handshake ({:?}): {}", status, response.message);
        return Err(ConnectionError::Rejected {
            status,
            message: response.message,
        }
        .into());
    }
    Ok(response)
}

async fn read_updates(
    mut channel: Channel<ProtobufCodec>,
    shared: Weak<Shared>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = channel.receive::<schema::StreamUpdate>() => received,
        };
        match received {
            Ok(batch) => {
                let Some(strong) = shared.upgrade() else {
                    break;
                };
                trace!("Stream update with {} results", batch.results.len());
                strong.streams.update(batch, &ConnectionRef(shared.clone()));
            }
            Err(e) if stays_in_sync(&e) => {
                warn!("Dropped stream update: {}", e);
            }
            Err(e) => {
                debug!("Stream reader stopped: {}", e);
                break;
            }
        }
    }
    if let Err(e) = channel.close().await {
        trace!("Closing stream socket: {}", e);
    }
}

/// Whether the socket is still on a frame boundary after `error`
fn stays_in_sync(error: &krpc_fabric::Error) -> bool {
    matches!(
        error,
        krpc_fabric::Error::FrameTooLarge { .. } | krpc_fabric::Error::Codec(_)
    )
}

async fn exchange(shared: Arc<Shared>, request: schema::Request) -> Result<schema::Response> {
    let shutdown = shared.shutdown.clone();
    let mut rpc = tokio::select! {
        _ = shutdown.cancelled() => return Err(ConnectionError::Closed.into()),
        rpc = shared.rpc.lock() => rpc,
    };
    tokio::select! {
        _ = shutdown.cancelled() => Err(ConnectionError::Closed.into()),
        response = rpc.request::<_, schema::Response>(&request) => {
            response.map_err(|e| {
                if !stays_in_sync(&e) {
                    // A later response could be read as the reply to another call
                    warn!("RPC socket unusable, closing connection: {}", e);
                    shared.shutdown.cancel();
                    shared.streams.close();
                }
                RpcError::Transport(e).into()
            })
        }
    }
}

impl Connection {
    /// Connect to a server and perform both handshakes.
    pub async fn connect(
        name: impl Into<String>,
        address: impl Into<String>,
        rpc_port: u16,
        stream_port: u16,
    ) -> Result<Self> {
        ConnectionConfig::new()
            .name(name)
            .address(address)
            .rpc_port(rpc_port)
            .stream_port(stream_port)
            .connect()
            .await
    }

    pub(crate) async fn connect_with(config: &ConnectionConfig) -> Result<Self> {
        if config.rpc_port == config.stream_port {
            return Err(ConnectionError::SamePort(config.rpc_port).into());
        }

        let rpc_addr = resolve(&config.address, config.rpc_port).await?;
        debug!("Connecting to RPC server at {}", rpc_addr);
        let mut rpc = open_channel(rpc_addr, config).await?;
        let response = handshake(
            &mut rpc,
            schema::ConnectionRequest {
                r#type: connection_request::Type::Rpc as i32,
                client_name: config.name.clone(),
                client_identifier: Vec::new(),
            },
        )
        .await?;
        let client_id = response.client_identifier;

        let stream_addr = resolve(&config.address, config.stream_port).await?;
        debug!("Connecting to stream server at {}", stream_addr);
        let mut stream = open_channel(stream_addr, config).await?;
        handshake(
            &mut stream,
            schema::ConnectionRequest {
                r#type: connection_request::Type::Stream as i32,
                client_name: String::new(),
                client_identifier: client_id.clone(),
            },
        )
        .await?;

        let exceptions = Arc::new(ExceptionRegistry::new());
        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            client_id,
            rpc: Mutex::new(rpc),
            shutdown: shutdown.clone(),
            streams: StreamManager::new(exceptions.clone()),
            exceptions,
            reader: SyncMutex::new(None),
        });

        let reader = tokio::spawn(read_updates(stream, Arc::downgrade(&shared), shutdown));
        *shared.reader.lock() = Some(reader);

        debug!("Connected as {:?}", config.name);
        Ok(Self { shared })
    }

    /// Client name sent in the handshake
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Opaque identifier the server issued during the handshake
    pub fn client_id(&self) -> &[u8] {
        &self.shared.client_id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    pub fn downgrade(&self) -> ConnectionRef {
        ConnectionRef(Arc::downgrade(&self.shared))
    }

    /// Close both sockets.
    ///
    /// In-flight calls fail with [`ConnectionError::Closed`]; waiters on streams
    /// without a value are woken with the same error.
    pub async fn close(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        debug!("Closing connection {:?}", self.shared.name);
        self.shared.shutdown.cancel();
        self.shared.streams.close();

        let reader = self.shared.reader.lock().take();
        if let Some(reader) = reader {
            if let Err(e) = reader.await {
                warn!("Stream reader task failed: {}", e);
            }
        }

        let mut rpc = self.shared.rpc.lock().await;
        if let Err(e) = rpc.close().await {
            trace!("Closing RPC socket: {}", e);
        }
    }

    /// Submit one call and return its raw result, error included.
    pub(crate) async fn invoke_raw(
        &self,
        call: schema::ProcedureCall,
    ) -> Result<schema::ProcedureResult> {
        if self.is_closed() {
            return Err(ConnectionError::Closed.into());
        }
        trace!("Invoking {}.{}", call.service, call.procedure);

        // The exchange runs to completion on its own task so a dropped caller
        // cannot leave a half-read response on the socket.
        let request = schema::Request { calls: vec![call] };
        let response = tokio::spawn(exchange(self.shared.clone(), request))
            .await
            .map_err(|e| RpcError::Failed(format!("RPC task failed: {}", e)))??;

        if let Some(error) = response.error {
            return Err(self.shared.exceptions.map(&error).into());
        }
        let mut results = response.results;
        if results.len() != 1 {
            return Err(RpcError::MalformedResponse(format!(
                "expected 1 result, got {}",
                results.len()
            ))
            .into());
        }
        Ok(results.remove(0))
    }

    /// Submit one call and return the encoded return value
    pub async fn invoke(&self, call: schema::ProcedureCall) -> Result<Vec<u8>> {
        let result = self.invoke_raw(call).await?;
        match result.error {
            Some(error) => Err(self.shared.exceptions.map(&error).into()),
            None => Ok(result.value),
        }
    }

    /// Build a call from arguments paired with their descriptors.
    pub fn build_call(
        &self,
        service: &str,
        procedure: &str,
        arguments: &[(Value, Type)],
    ) -> Result<schema::ProcedureCall> {
        let arguments = arguments
            .iter()
            .enumerate()
            .map(|(position, (value, ty))| {
                Ok(schema::Argument {
                    position: position as u32,
                    value: encoder::encode(value, ty)?,
                })
            })
            .collect::<Result<_>>()?;
        Ok(schema::ProcedureCall {
            service: service.to_string(),
            procedure: procedure.to_string(),
            arguments,
            ..Default::default()
        })
    }

    /// Invoke a procedure and decode its return value as `T`
    pub async fn call<T: FromValue>(
        &self,
        service: &str,
        procedure: &str,
        arguments: &[(Value, Type)],
        return_type: &Type,
    ) -> Result<T> {
        let call = self.build_call(service, procedure, arguments)?;
        let bytes = self.invoke(call).await?;
        Ok(encoder::decode_as(&bytes, return_type, &self.downgrade())?)
    }

    /// Invoke a procedure that returns nothing
    pub async fn call_void(
        &self,
        service: &str,
        procedure: &str,
        arguments: &[(Value, Type)],
    ) -> Result<()> {
        let call = self.build_call(service, procedure, arguments)?;
        self.invoke(call).await.map(|_| ())
    }

    /// Register a stream for `call`.
    ///
    /// The server returns the existing id for a call it already streams, in
    /// which case the returned handle shares that entry. With
    /// `immediate_value` an entry that holds nothing yet is seeded by invoking
    /// the call once. A failed seed leaves the stream registered but empty.
    pub async fn add_stream<T: FromValue>(
        &self,
        call: schema::ProcedureCall,
        return_type: Type,
        immediate_value: bool,
    ) -> Result<Stream<T>> {
        let id = self.krpc().add_stream(call.clone(), false).await?;
        let (entry, _) = self.shared.streams.get_or_insert(id, return_type);
        if immediate_value && entry.is_empty() {
            match self.invoke_raw(call).await {
                Ok(result) => entry.seed(result),
                Err(e) => warn!("Could not seed stream {}: {}", id, e),
            }
        }
        Ok(Stream::new(self.clone(), entry))
    }

    /// Handle for a stream the server created on its own, such as an event's
    pub fn stream<T: FromValue>(&self, id: u64, return_type: Type) -> Stream<T> {
        let (entry, _) = self.shared.streams.get_or_insert(id, return_type);
        Stream::new(self.clone(), entry)
    }

    /// Handle for a stream already registered on this connection
    pub fn existing_stream<T: FromValue>(&self, id: u64) -> Result<Stream<T>> {
        let entry = self.shared.streams.get(id)?;
        Ok(Stream::new(self.clone(), entry))
    }

    /// Wrap an event returned by a procedure.
    pub fn event(&self, event: schema::Event) -> Result<Event> {
        let stream = event.stream.ok_or_else(|| {
            RpcError::MalformedResponse("event has no stream".to_string())
        })?;
        Ok(Event::new(self.stream(stream.id, Type::Bool)))
    }

    /// Map `(service, name)` server errors to errors built by `constructor`
    pub fn register_exception<F>(&self, service: &str, name: &str, constructor: F)
    where
        F: Fn(String) -> crate::error::BoxError + Send + Sync + 'static,
    {
        let constructor: ExceptionConstructor = Arc::new(constructor);
        self.shared.exceptions.register(service, name, constructor);
    }

    /// The built-in control service
    pub fn krpc(&self) -> Krpc<'_> {
        Krpc::new(self)
    }

    /// Wait for the next processed update batch, or until `timeout` elapses.
    pub async fn wait_for_stream_update(&self, timeout: Option<Duration>) {
        let mut updates = self.shared.streams.subscribe_updates();
        match timeout {
            Some(timeout) if timeout.is_zero() => {}
            Some(timeout) => {
                let _ = tokio::time::timeout(timeout, updates.changed()).await;
            }
            None => {
                let _ = updates.changed().await;
            }
        }
    }

    /// Run `callback` on the reader task after every update batch
    pub fn add_stream_update_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.streams.add_update_callback(Arc::new(callback))
    }

    pub fn remove_stream_update_callback(&self, id: CallbackId) -> bool {
        self.shared.streams.remove_update_callback(id)
    }

    pub(crate) fn streams(&self) -> &StreamManager {
        &self.shared.streams
    }
}
