//! Registry of live streams and dispatch of pushed updates.
//!
//! One entry exists per server-assigned stream id. The background reader is
//! the only writer of an entry's value slot; handles read the slot and wait on
//! the entry's version counter. Entry locks are never held across an await
//! point or while callbacks run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use krpc_fabric::schema;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::connection::ConnectionRef;
use crate::encoder;
use crate::error::{ConnectionError, Error, Result, StreamError};
use crate::exceptions::ExceptionRegistry;
use crate::types::Type;
use crate::value::Value;

/// Identifies a registered callback so it can be removed again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) type StreamCallback = Arc<dyn Fn(Result<Value>) + Send + Sync>;
pub(crate) type UpdateCallback = Arc<dyn Fn() + Send + Sync>;

enum Slot {
    Value(Vec<u8>),
    Error(schema::Error),
}

#[derive(Default)]
struct EntryState {
    started: bool,
    removed: bool,
    closed: bool,
    slot: Option<Slot>,
    decoded: Option<Value>,
    rate: f32,
}

pub(crate) struct StreamEntry {
    id: u64,
    return_type: Type,
    exceptions: Arc<ExceptionRegistry>,
    state: Mutex<EntryState>,
    version: watch::Sender<u64>,
    callbacks: Mutex<Vec<(CallbackId, StreamCallback)>>,
}

impl StreamEntry {
    fn new(id: u64, return_type: Type, exceptions: Arc<ExceptionRegistry>) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            id,
            return_type,
            exceptions,
            state: Mutex::new(EntryState::default()),
            version,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn return_type(&self) -> &Type {
        &self.return_type
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    /// Neither a value nor an error has arrived
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.slot.is_none() && !state.removed
    }

    pub fn mark_started(&self) {
        self.state.lock().started = true;
    }

    pub fn rate(&self) -> f32 {
        self.state.lock().rate
    }

    pub fn set_rate(&self, rate: f32) {
        self.state.lock().rate = rate;
    }

    /// Receiver that observes every update applied after this call
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Current value or error; `None` while nothing has arrived.
    ///
    /// The raw value is decoded at most once per update.
    pub fn current(&self, connection: &ConnectionRef) -> Option<Result<Value>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.removed {
            return Some(Err(StreamError::Removed(self.id).into()));
        }
        let result: Result<Value> = match &state.slot {
            None if state.closed => Err(ConnectionError::Closed.into()),
            None => return None,
            Some(Slot::Error(err)) => Err(self.exceptions.map(err).into()),
            Some(Slot::Value(bytes)) => match &state.decoded {
                Some(value) => Ok(value.clone()),
                None => encoder::decode(bytes, &self.return_type, connection)
                    .map(|decoded| {
                        state.decoded = Some(decoded.clone());
                        decoded
                    })
                    .map_err(Error::from),
            },
        };
        Some(result)
    }

    /// Wait until the entry holds a value or an error, then return it
    pub async fn wait_for_value(&self, connection: &ConnectionRef) -> Result<Value> {
        let mut rx = self.subscribe();
        loop {
            if let Some(result) = self.current(connection) {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(ConnectionError::Closed.into());
            }
        }
    }

    /// Store the result of a procedure invocation unless a push already arrived
    pub fn seed(&self, result: schema::ProcedureResult) {
        {
            let mut state = self.state.lock();
            if state.slot.is_some() || state.removed {
                return;
            }
            state.slot = Some(slot_of(result));
            state.decoded = None;
        }
        self.version.send_modify(|v| *v += 1);
    }

    /// Replace a stored `true` with `false`, leaving any other value alone.
    pub fn reset_flag(&self, connection: &ConnectionRef) {
        let mut state = self.state.lock();
        let is_true = match (&state.slot, &state.decoded) {
            (Some(Slot::Value(_)), Some(value)) => *value == Value::Bool(true),
            (Some(Slot::Value(bytes)), None) => matches!(
                encoder::decode(bytes, &self.return_type, connection),
                Ok(Value::Bool(true))
            ),
            _ => false,
        };
        if is_true {
            state.slot = Some(Slot::Value(vec![0]));
            state.decoded = Some(Value::Bool(false));
        }
    }

    fn apply(&self, result: schema::ProcedureResult, connection: &ConnectionRef) {
        {
            let mut state = self.state.lock();
            if state.removed {
                return;
            }
            state.slot = Some(slot_of(result));
            state.decoded = None;
        }
        self.version.send_modify(|v| *v += 1);

        let callbacks: Vec<StreamCallback> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            if let Some(result) = self.current(connection) {
                callback(result);
            }
        }
    }

    /// Returns whether this call moved the entry to the removed state
    fn mark_removed(&self) -> bool {
        let transitioned = {
            let mut state = self.state.lock();
            let transitioned = !state.removed;
            state.removed = true;
            state.slot = None;
            state.decoded = None;
            transitioned
        };
        if transitioned {
            self.callbacks.lock().clear();
            self.version.send_modify(|v| *v += 1);
        }
        transitioned
    }

    fn mark_closed(&self) {
        self.state.lock().closed = true;
        self.version.send_modify(|v| *v += 1);
    }

    pub fn add_callback(&self, callback: StreamCallback) -> CallbackId {
        let id = CallbackId::next();
        self.callbacks.lock().push((id, callback));
        id
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(cb_id, _)| *cb_id != id);
        callbacks.len() != before
    }
}

fn slot_of(result: schema::ProcedureResult) -> Slot {
    match result.error {
        Some(err) => Slot::Error(err),
        None => Slot::Value(result.value),
    }
}

pub(crate) struct StreamManager {
    exceptions: Arc<ExceptionRegistry>,
    streams: Mutex<HashMap<u64, Arc<StreamEntry>>>,
    updates: watch::Sender<u64>,
    update_callbacks: Mutex<Vec<(CallbackId, UpdateCallback)>>,
}

impl StreamManager {
    pub fn new(exceptions: Arc<ExceptionRegistry>) -> Self {
        let (updates, _) = watch::channel(0);
        Self {
            exceptions,
            streams: Mutex::new(HashMap::new()),
            updates,
            update_callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Entry for `id`, installing one with `return_type` if it is new.
    ///
    /// The flag is true when this call created the entry.
    pub fn get_or_insert(&self, id: u64, return_type: Type) -> (Arc<StreamEntry>, bool) {
        let mut streams = self.streams.lock();
        if let Some(entry) = streams.get(&id) {
            return (entry.clone(), false);
        }
        debug!("Registering stream {} returning {}", id, return_type);
        let entry = Arc::new(StreamEntry::new(id, return_type, self.exceptions.clone()));
        streams.insert(id, entry.clone());
        (entry, true)
    }

    pub fn get(&self, id: u64) -> Result<Arc<StreamEntry>> {
        self.streams
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| StreamError::NotFound(id).into())
    }

    #[cfg(test)]
    pub fn contains(&self, id: u64) -> bool {
        self.streams.lock().contains_key(&id)
    }

    /// Drop `entry` from the registry and fail its pending and future reads.
    ///
    /// Returns false if the entry had already been removed.
    pub fn remove(&self, entry: &Arc<StreamEntry>) -> bool {
        {
            let mut streams = self.streams.lock();
            if streams
                .get(&entry.id)
                .is_some_and(|current| Arc::ptr_eq(current, entry))
            {
                streams.remove(&entry.id);
            }
        }
        let transitioned = entry.mark_removed();
        if transitioned {
            debug!("Removed stream {}", entry.id);
        }
        transitioned
    }

    /// Apply one pushed batch, then notify connection-wide listeners once.
    pub fn update(&self, batch: schema::StreamUpdate, connection: &ConnectionRef) {
        for result in batch.results {
            let entry = self.streams.lock().get(&result.id).cloned();
            match entry {
                Some(entry) => entry.apply(result.result.unwrap_or_default(), connection),
                None => trace!("Ignoring update for unknown stream {}", result.id),
            }
        }
        self.updates.send_modify(|v| *v += 1);

        let callbacks: Vec<UpdateCallback> = self
            .update_callbacks
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    pub fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.updates.subscribe()
    }

    pub fn add_update_callback(&self, callback: UpdateCallback) -> CallbackId {
        let id = CallbackId::next();
        self.update_callbacks.lock().push((id, callback));
        id
    }

    pub fn remove_update_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.update_callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(cb_id, _)| *cb_id != id);
        callbacks.len() != before
    }

    /// Wake every waiter after the connection closes; cached values stay readable.
    pub fn close(&self) {
        let entries: Vec<_> = self.streams.lock().values().cloned().collect();
        for entry in entries {
            entry.mark_closed();
        }
        self.updates.send_modify(|v| *v += 1);
    }
}
