//! Scripted in-process kRPC server for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use krpc_client::{encoder, ConnectionRef, Type, Value};
use krpc_fabric::codec::ProtobufCodec;
use krpc_fabric::schema::{self, connection_request, connection_response};
use krpc_fabric::transport::TcpTransportListener;
use krpc_fabric::Channel;
use parking_lot::Mutex;

pub const PUSH_INTERVAL: Duration = Duration::from_millis(10);

struct ServerStream {
    call: schema::ProcedureCall,
    started: bool,
    rate: f32,
}

#[derive(Default)]
struct ClientState {
    name: String,
}

struct ServerState {
    clients: Mutex<HashMap<Vec<u8>, ClientState>>,
    streams: Mutex<HashMap<u64, ServerStream>>,
    next_client: AtomicU64,
    next_stream: AtomicU64,
    counter: AtomicI32,
    flag: Mutex<bool>,
    result: Mutex<Result<i32, String>>,
    stream_calls: AtomicU64,
    padding: AtomicUsize,
}

/// A server with the `KRPC` control service and a `TestService` to exercise.
pub struct TestServer {
    pub rpc_addr: SocketAddr,
    pub stream_addr: SocketAddr,
    state: Arc<ServerState>,
}

/// Log to the test harness when `RUST_LOG` asks for it
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl TestServer {
    pub async fn start() -> Self {
        init_tracing();
        let rpc = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let stream = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let rpc_addr = rpc.local_addr().unwrap();
        let stream_addr = stream.local_addr().unwrap();

        let state = Arc::new(ServerState {
            clients: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            next_client: AtomicU64::new(1),
            next_stream: AtomicU64::new(1),
            counter: AtomicI32::new(0),
            flag: Mutex::new(false),
            result: Mutex::new(Ok(0)),
            stream_calls: AtomicU64::new(0),
            padding: AtomicUsize::new(0),
        });

        let rpc_state = state.clone();
        tokio::spawn(async move {
            while let Ok((transport, _)) = rpc.accept().await {
                let channel = Channel::from_transport(transport, ProtobufCodec);
                tokio::spawn(serve_rpc(channel, rpc_state.clone()));
            }
        });

        let stream_state = state.clone();
        tokio::spawn(async move {
            while let Ok((transport, _)) = stream.accept().await {
                let channel = Channel::from_transport(transport, ProtobufCodec);
                tokio::spawn(serve_stream(channel, stream_state.clone()));
            }
        });

        Self {
            rpc_addr,
            stream_addr,
            state,
        }
    }

    pub fn rpc_port(&self) -> u16 {
        self.rpc_addr.port()
    }

    pub fn stream_port(&self) -> u16 {
        self.stream_addr.port()
    }

    pub async fn connect(&self, name: &str) -> krpc_client::Connection {
        krpc_client::Connection::connect(name, "127.0.0.1", self.rpc_port(), self.stream_port())
            .await
            .unwrap()
    }

    pub fn stream_count(&self) -> usize {
        self.state.streams.lock().len()
    }

    pub fn stream_rate(&self, id: u64) -> Option<f32> {
        self.state.streams.lock().get(&id).map(|s| s.rate)
    }

    pub fn is_started(&self, id: u64) -> bool {
        self.state
            .streams
            .lock()
            .get(&id)
            .map_or(false, |s| s.started)
    }

    pub fn set_flag(&self, value: bool) {
        *self.state.flag.lock() = value;
    }

    pub fn set_result(&self, value: i32) {
        *self.state.result.lock() = Ok(value);
    }

    pub fn set_error(&self, description: &str) {
        *self.state.result.lock() = Err(description.to_string());
    }

    /// Length of the string `GetPadding` returns
    pub fn set_padding(&self, len: usize) {
        self.state.padding.store(len, Ordering::SeqCst);
    }

    pub fn counter(&self) -> i32 {
        self.state.counter.load(Ordering::SeqCst)
    }
}

pub fn call(service: &str, procedure: &str, arguments: &[(Value, Type)]) -> schema::ProcedureCall {
    schema::ProcedureCall {
        service: service.to_string(),
        procedure: procedure.to_string(),
        arguments: arguments
            .iter()
            .enumerate()
            .map(|(position, (value, ty))| schema::Argument {
                position: position as u32,
                value: encoder::encode(value, ty).unwrap(),
            })
            .collect(),
        ..Default::default()
    }
}

fn handshake_reply(
    status: connection_response::Status,
    message: &str,
    client_identifier: Vec<u8>,
) -> schema::ConnectionResponse {
    schema::ConnectionResponse {
        status: status as i32,
        message: message.to_string(),
        client_identifier,
    }
}

async fn serve_rpc(mut channel: Channel<ProtobufCodec>, state: Arc<ServerState>) {
    let Ok(hello) = channel.receive::<schema::ConnectionRequest>().await else {
        return;
    };
    if hello.r#type != connection_request::Type::Rpc as i32 {
        let reply = handshake_reply(
            connection_response::Status::WrongType,
            "Wrong connection type. Expected an RPC connection request",
            Vec::new(),
        );
        let _ = channel.send(&reply).await;
        return;
    }

    let client_id = state
        .next_client
        .fetch_add(1, Ordering::SeqCst)
        .to_le_bytes()
        .to_vec();
    state.clients.lock().insert(
        client_id.clone(),
        ClientState {
            name: hello.client_name.clone(),
        },
    );
    let reply = handshake_reply(connection_response::Status::Ok, "", client_id.clone());
    if channel.send(&reply).await.is_err() {
        return;
    }

    while let Ok(request) = channel.receive::<schema::Request>().await {
        let mut results = Vec::new();
        for call in &request.calls {
            if call.service == "TestService" && call.procedure == "BlockForever" {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if call.service == "TestService" && call.procedure == "Hangup" {
                return;
            }
            results.push(evaluate(&state, &client_id, call));
        }
        let response = schema::Response {
            error: None,
            results,
        };
        if channel.send(&response).await.is_err() {
            break;
        }
    }
}

async fn serve_stream(mut channel: Channel<ProtobufCodec>, state: Arc<ServerState>) {
    let Ok(hello) = channel.receive::<schema::ConnectionRequest>().await else {
        return;
    };
    if hello.r#type != connection_request::Type::Stream as i32 {
        let reply = handshake_reply(
            connection_response::Status::WrongType,
            "Wrong connection type. Expected a STREAM connection request",
            Vec::new(),
        );
        let _ = channel.send(&reply).await;
        return;
    }
    let client_id = hello.client_identifier;
    if !state.clients.lock().contains_key(&client_id) {
        let reply = handshake_reply(
            connection_response::Status::MalformedMessage,
            "Unknown client identifier",
            Vec::new(),
        );
        let _ = channel.send(&reply).await;
        return;
    }
    let reply = handshake_reply(connection_response::Status::Ok, "", Vec::new());
    if channel.send(&reply).await.is_err() {
        return;
    }

    loop {
        tokio::time::sleep(PUSH_INTERVAL).await;
        let started: Vec<(u64, schema::ProcedureCall)> = state
            .streams
            .lock()
            .iter()
            .filter(|(_, s)| s.started)
            .map(|(id, s)| (*id, s.call.clone()))
            .collect();
        if started.is_empty() {
            continue;
        }
        let results = started
            .into_iter()
            .map(|(id, call)| {
                state.stream_calls.fetch_add(1, Ordering::SeqCst);
                schema::StreamResult {
                    id,
                    result: Some(evaluate(&state, &client_id, &call)),
                }
            })
            .collect();
        if channel
            .send(&schema::StreamUpdate { results })
            .await
            .is_err()
        {
            break;
        }
    }
}

fn ok(value: &Value, ty: &Type) -> schema::ProcedureResult {
    schema::ProcedureResult {
        error: None,
        value: encoder::encode(value, ty).unwrap(),
    }
}

fn void() -> schema::ProcedureResult {
    schema::ProcedureResult::default()
}

fn fail(service: &str, name: &str, description: &str, stack_trace: &str) -> schema::ProcedureResult {
    schema::ProcedureResult {
        error: Some(schema::Error {
            service: service.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            stack_trace: stack_trace.to_string(),
        }),
        value: Vec::new(),
    }
}

fn arg(call: &schema::ProcedureCall, position: u32, ty: &Type) -> Value {
    let argument = call
        .arguments
        .iter()
        .find(|a| a.position == position)
        .unwrap();
    encoder::decode(&argument.value, ty, &ConnectionRef::detached()).unwrap()
}

fn evaluate(
    state: &ServerState,
    client_id: &[u8],
    call: &schema::ProcedureCall,
) -> schema::ProcedureResult {
    match (call.service.as_str(), call.procedure.as_str()) {
        ("KRPC", "AddStream") => {
            let Value::ProcedureCall(target) = arg(call, 0, &Type::ProcedureCall) else {
                unreachable!()
            };
            let start = arg(call, 1, &Type::Bool) == Value::Bool(true);
            let mut streams = state.streams.lock();
            let existing = streams
                .iter()
                .find(|(_, s)| s.call == target)
                .map(|(id, _)| *id);
            let id = existing.unwrap_or_else(|| {
                let id = state.next_stream.fetch_add(1, Ordering::SeqCst);
                streams.insert(
                    id,
                    ServerStream {
                        call: target,
                        started: false,
                        rate: 0.0,
                    },
                );
                id
            });
            if start {
                if let Some(stream) = streams.get_mut(&id) {
                    stream.started = true;
                }
            }
            ok(&Value::Stream(schema::Stream { id }), &Type::Stream)
        }
        ("KRPC", "StartStream") => {
            let Value::UInt64(id) = arg(call, 0, &Type::UInt64) else {
                unreachable!()
            };
            match state.streams.lock().get_mut(&id) {
                Some(stream) => {
                    stream.started = true;
                    void()
                }
                None => no_such_stream(id),
            }
        }
        ("KRPC", "SetStreamRate") => {
            let Value::UInt64(id) = arg(call, 0, &Type::UInt64) else {
                unreachable!()
            };
            let Value::Float(rate) = arg(call, 1, &Type::Float) else {
                unreachable!()
            };
            match state.streams.lock().get_mut(&id) {
                Some(stream) => {
                    stream.rate = rate;
                    void()
                }
                None => no_such_stream(id),
            }
        }
        ("KRPC", "RemoveStream") => {
            let Value::UInt64(id) = arg(call, 0, &Type::UInt64) else {
                unreachable!()
            };
            match state.streams.lock().remove(&id) {
                Some(_) => void(),
                None => no_such_stream(id),
            }
        }
        ("KRPC", "GetClientName") => {
            let name = state
                .clients
                .lock()
                .get(client_id)
                .map(|c| c.name.clone())
                .unwrap_or_default();
            ok(&Value::String(name), &Type::String)
        }
        ("KRPC", "GetClientID") => ok(&Value::Bytes(client_id.to_vec()), &Type::Bytes),
        ("KRPC", "GetStatus") => {
            let status = schema::Status {
                version: "0.5.4".to_string(),
                stream_rpcs_executed: state.stream_calls.load(Ordering::SeqCst),
                ..Default::default()
            };
            ok(&Value::Status(status), &Type::Status)
        }
        ("KRPC", "GetServices") => {
            let services = schema::Services {
                services: vec![
                    schema::Service {
                        name: "KRPC".to_string(),
                        ..Default::default()
                    },
                    schema::Service {
                        name: "TestService".to_string(),
                        ..Default::default()
                    },
                ],
            };
            ok(&Value::Services(services), &Type::Services)
        }
        ("TestService", "Int32ToString") => {
            let Value::SInt32(n) = arg(call, 0, &Type::SInt32) else {
                unreachable!()
            };
            ok(&Value::String(n.to_string()), &Type::String)
        }
        ("TestService", "Echo") => ok(&arg(call, 0, &Type::String), &Type::String),
        ("TestService", "EchoObject") => {
            let ty = Type::class("TestService", "TestClass");
            ok(&arg(call, 0, &ty), &ty)
        }
        ("TestService", "Counter") => {
            let n = state.counter.fetch_add(1, Ordering::SeqCst) + 1;
            ok(&Value::SInt32(n), &Type::SInt32)
        }
        ("TestService", "GetPadding") => {
            let len = state.padding.load(Ordering::SeqCst);
            ok(&Value::String("x".repeat(len)), &Type::String)
        }
        ("TestService", "GetFlag") => ok(&Value::Bool(*state.flag.lock()), &Type::Bool),
        ("TestService", "SetFlag") => {
            let Value::Bool(flag) = arg(call, 0, &Type::Bool) else {
                unreachable!()
            };
            *state.flag.lock() = flag;
            void()
        }
        ("TestService", "GetResult") => match &*state.result.lock() {
            Ok(n) => ok(&Value::SInt32(*n), &Type::SInt32),
            Err(description) => fail("KRPC", "InvalidOperationException", description, ""),
        },
        ("TestService", "ThrowInvalidOperation") => fail(
            "KRPC",
            "InvalidOperationException",
            "Invalid operation",
            "at TestService.ThrowInvalidOperation()",
        ),
        ("TestService", "ThrowArgument") => {
            fail("KRPC", "ArgumentException", "Invalid argument", "")
        }
        ("TestService", "ThrowArgumentNull") => {
            fail("KRPC", "ArgumentNullException", "Value cannot be null", "")
        }
        ("TestService", "ThrowArgumentOutOfRange") => fail(
            "KRPC",
            "ArgumentOutOfRangeException",
            "Specified argument was out of the range of valid values",
            "",
        ),
        ("TestService", "ThrowCustom") => fail(
            "TestService",
            "CustomException",
            "A custom kRPC exception",
            "",
        ),
        (service, procedure) => fail(
            "",
            "",
            &format!("Procedure not found: {}.{}", service, procedure),
            "",
        ),
    }
}

fn no_such_stream(id: u64) -> schema::ProcedureResult {
    fail(
        "KRPC",
        "InvalidOperationException",
        &format!("Stream does not exist with id {}", id),
        "",
    )
}
