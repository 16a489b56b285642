//! The server's built-in `KRPC` service.

use krpc_fabric::schema;

use crate::connection::Connection;
use crate::error::Result;
use crate::types::Type;
use crate::value::Value;

const SERVICE: &str = "KRPC";

/// Control procedures for streams and server introspection
pub struct Krpc<'a> {
    connection: &'a Connection,
}

impl<'a> Krpc<'a> {
    pub(crate) fn new(connection: &'a Connection) -> Self {
        Self { connection }
    }

    /// Ask the server for a stream evaluating `call`; returns its id
    pub async fn add_stream(&self, call: schema::ProcedureCall, start: bool) -> Result<u64> {
        let stream: schema::Stream = self
            .connection
            .call(
                SERVICE,
                "AddStream",
                &[
                    (Value::ProcedureCall(call), Type::ProcedureCall),
                    (Value::Bool(start), Type::Bool),
                ],
                &Type::Stream,
            )
            .await?;
        Ok(stream.id)
    }

    pub async fn start_stream(&self, id: u64) -> Result<()> {
        self.connection
            .call_void(SERVICE, "StartStream", &[(Value::UInt64(id), Type::UInt64)])
            .await
    }

    /// Target update rate in Hz; zero means as fast as possible
    pub async fn set_stream_rate(&self, id: u64, rate: f32) -> Result<()> {
        self.connection
            .call_void(
                SERVICE,
                "SetStreamRate",
                &[
                    (Value::UInt64(id), Type::UInt64),
                    (Value::Float(rate), Type::Float),
                ],
            )
            .await
    }

    pub async fn remove_stream(&self, id: u64) -> Result<()> {
        self.connection
            .call_void(SERVICE, "RemoveStream", &[(Value::UInt64(id), Type::UInt64)])
            .await
    }

    pub async fn get_status(&self) -> Result<schema::Status> {
        self.connection
            .call(SERVICE, "GetStatus", &[], &Type::Status)
            .await
    }

    pub async fn get_services(&self) -> Result<schema::Services> {
        self.connection
            .call(SERVICE, "GetServices", &[], &Type::Services)
            .await
    }

    pub async fn get_client_id(&self) -> Result<Vec<u8>> {
        self.connection
            .call(SERVICE, "GetClientID", &[], &Type::Bytes)
            .await
    }

    pub async fn get_client_name(&self) -> Result<String> {
        self.connection
            .call(SERVICE, "GetClientName", &[], &Type::String)
            .await
    }
}
