//! Mapping of server-reported errors to local error kinds.

use std::collections::HashMap;
use std::sync::Arc;

use krpc_fabric::schema;
use parking_lot::RwLock;
use tracing::trace;

use crate::error::{BoxError, RpcError};

/// Builds the local error for a server-defined exception from its message
pub type ExceptionConstructor = Arc<dyn Fn(String) -> BoxError + Send + Sync>;

/// Table of `(service, name)` to constructor, filled in by service stubs.
#[derive(Default)]
pub struct ExceptionRegistry {
    constructors: RwLock<HashMap<(String, String), ExceptionConstructor>>,
}

impl ExceptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor, replacing any earlier one for the same key
    pub fn register(
        &self,
        service: impl Into<String>,
        name: impl Into<String>,
        constructor: ExceptionConstructor,
    ) {
        self.constructors
            .write()
            .insert((service.into(), name.into()), constructor);
    }

    pub fn is_registered(&self, service: &str, name: &str) -> bool {
        self.constructors
            .read()
            .contains_key(&(service.to_string(), name.to_string()))
    }

    /// Convert an error from a response or stream update.
    pub fn map(&self, error: &schema::Error) -> RpcError {
        let message = message_of(error);
        match (error.service.as_str(), error.name.as_str()) {
            ("KRPC", "InvalidOperationException") => RpcError::InvalidOperation(message),
            ("KRPC", "ArgumentException") => RpcError::InvalidArgument(message),
            ("KRPC", "ArgumentNullException") => RpcError::NullArgument(message),
            ("KRPC", "ArgumentOutOfRangeException") => RpcError::ArgumentOutOfRange(message),
            ("", _) | (_, "") => RpcError::Failed(message),
            (service, name) => {
                let constructor = self
                    .constructors
                    .read()
                    .get(&(service.to_string(), name.to_string()))
                    .cloned();
                match constructor {
                    Some(constructor) => RpcError::Service {
                        service: service.to_string(),
                        name: name.to_string(),
                        source: constructor(message),
                    },
                    None => {
                        trace!("No constructor registered for {}.{}", service, name);
                        RpcError::Failed(message)
                    }
                }
            }
        }
    }
}

fn message_of(error: &schema::Error) -> String {
    if error.stack_trace.is_empty() {
        error.description.clone()
    } else {
        format!(
            "{}\nServer stack trace:\n{}",
            error.description, error.stack_trace
        )
    }
}
