//! Handles over stream registry entries.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::connection::Connection;
use crate::error::{Error, Result, StreamError};
use crate::stream_manager::{CallbackId, StreamEntry};
use crate::value::{FromValue, Value};

/// A server-side subscription that re-evaluates a call and pushes results.
///
/// Handles for the same stream id share one entry: removing the stream
/// through any of them fails reads through all of them.
pub struct Stream<T = Value> {
    connection: Connection,
    entry: Arc<StreamEntry>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            entry: self.entry.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.entry.id())
            .field("return_type", self.entry.return_type())
            .finish()
    }
}

impl<T: FromValue> Stream<T> {
    pub(crate) fn new(connection: Connection, entry: Arc<StreamEntry>) -> Self {
        Self {
            connection,
            entry,
            _marker: PhantomData,
        }
    }

    /// Server-assigned stream id
    pub fn id(&self) -> u64 {
        self.entry.id()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn is_started(&self) -> bool {
        self.entry.is_started()
    }

    /// Ask the server to begin pushing updates. Starting twice is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.entry.is_removed() {
            return Err(StreamError::Removed(self.id()).into());
        }
        if self.entry.is_started() {
            return Ok(());
        }
        self.connection.krpc().start_stream(self.id()).await?;
        self.entry.mark_started();
        debug!("Started stream {}", self.id());
        Ok(())
    }

    /// Start the stream and wait until it holds a value or an error
    pub async fn start_and_wait(&self) -> Result<()> {
        self.start().await?;
        self.entry
            .wait_for_value(&self.connection.downgrade())
            .await
            .map(|_| ())
    }

    /// Most recent value, starting the stream and waiting for its first
    /// result if needed.
    ///
    /// An error delivered by the server is returned on every call until a
    /// later update replaces it.
    pub async fn get(&self) -> Result<T> {
        self.start().await?;
        let value = self
            .entry
            .wait_for_value(&self.connection.downgrade())
            .await?;
        Ok(T::from_value(value)?)
    }

    /// Most recent value without starting or waiting.
    ///
    /// Safe to call from a callback.
    pub fn value(&self) -> Result<T> {
        match self.entry.current(&self.connection.downgrade()) {
            Some(value) => Ok(T::from_value(value?)?),
            None => Err(StreamError::NoValue(self.id()).into()),
        }
    }

    /// Wait for the next update to this stream.
    ///
    /// `None` waits indefinitely and a zero timeout returns at once. An
    /// elapsed timeout is not an error; compare values to tell it apart.
    pub async fn wait_for_update(&self, timeout: Option<Duration>) -> Result<()> {
        if self.entry.is_removed() {
            return Err(StreamError::Removed(self.id()).into());
        }
        let mut updates = self.entry.subscribe();
        match timeout {
            Some(timeout) if timeout.is_zero() => return Ok(()),
            Some(timeout) => {
                let _ = tokio::time::timeout(timeout, updates.changed()).await;
            }
            None => {
                let _ = updates.changed().await;
            }
        }
        if self.entry.is_removed() {
            return Err(StreamError::Removed(self.id()).into());
        }
        Ok(())
    }

    /// Run `callback` on the reader task with every update.
    ///
    /// Errors arrive as the same error [`get`](Self::get) would return. The
    /// callback must not block.
    pub fn add_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(Result<T>) + Send + Sync + 'static,
        T: 'static,
    {
        self.entry.add_callback(Arc::new(move |result: Result<Value>| {
            callback(result.and_then(|value| T::from_value(value).map_err(Error::from)))
        }))
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.entry.remove_callback(id)
    }

    pub(crate) fn entry(&self) -> &StreamEntry {
        &self.entry
    }

    /// Target update rate in Hz; zero means as fast as possible
    pub async fn set_rate(&self, rate: f32) -> Result<()> {
        self.connection
            .krpc()
            .set_stream_rate(self.id(), rate)
            .await?;
        self.entry.set_rate(rate);
        Ok(())
    }

    pub fn rate(&self) -> f32 {
        self.entry.rate()
    }

    /// Remove the stream on the server and fail reads through every handle.
    ///
    /// Removing an already removed stream does nothing.
    pub async fn remove(&self) -> Result<()> {
        if !self.connection.streams().remove(&self.entry) {
            return Ok(());
        }
        if self.connection.is_closed() {
            return Ok(());
        }
        self.connection.krpc().remove_stream(self.id()).await
    }
}
