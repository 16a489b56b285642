//! Boolean streams that signal a server-side condition.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{ConnectionError, Result, StreamError};
use crate::stream::Stream;
use crate::stream_manager::CallbackId;
use crate::value::Value;

/// Wraps a `bool` stream that becomes true when a condition is met.
#[derive(Debug, Clone)]
pub struct Event {
    stream: Stream<bool>,
}

impl Event {
    pub(crate) fn new(stream: Stream<bool>) -> Self {
        Self { stream }
    }

    /// The underlying stream
    pub fn stream(&self) -> &Stream<bool> {
        &self.stream
    }

    pub async fn start(&self) -> Result<()> {
        self.stream.start().await
    }

    /// Wait for the condition to become true.
    ///
    /// A true value seen by an earlier wait does not count; a fresh update is
    /// needed.
    pub async fn wait_for(&self) -> Result<()> {
        self.wait(None).await
    }

    /// Like [`wait_for`](Self::wait_for) but gives up at the deadline.
    ///
    /// Giving up is not an error; check [`Stream::value`] on
    /// [`stream`](Self::stream) to see which happened.
    pub async fn wait_for_timeout(&self, timeout: Duration) -> Result<()> {
        self.wait(Some(Instant::now() + timeout)).await
    }

    async fn wait(&self, deadline: Option<Instant>) -> Result<()> {
        self.stream.start().await?;
        let connection = self.stream.connection().downgrade();
        let entry = self.stream.entry();
        entry.reset_flag(&connection);
        let mut updates = entry.subscribe();
        loop {
            if self.stream.connection().is_closed() {
                return Err(ConnectionError::Closed.into());
            }
            if entry.is_removed() {
                return Err(StreamError::Removed(self.stream.id()).into());
            }
            if let Some(result) = entry.current(&connection) {
                if let Value::Bool(true) = result? {
                    return Ok(());
                }
            }
            let changed = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, updates.changed()).await {
                        Ok(changed) => changed,
                        Err(_) => return Ok(()),
                    }
                }
                None => updates.changed().await,
            };
            if changed.is_err() {
                return Ok(());
            }
        }
    }

    /// Run `callback` on the reader task each time an update reads true
    pub fn add_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.stream.add_callback(move |value| {
            if let Ok(true) = value {
                callback();
            }
        })
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.stream.remove_callback(id)
    }

    pub async fn remove(&self) -> Result<()> {
        self.stream.remove().await
    }
}
