//! Synchronous pub/sub for conversion lifecycle events.
//!
//! The event set is fixed and closed: `onOcrStart`, `onOcrComplete`,
//! `onCaptioningStart`, `onCaptioningComplete`, `onError`. Registering or
//! removing a listener under any other name fails with
//! [`Img2TextError::UnknownEvent`].
//!
//! Dispatch is synchronous and in registration order over a snapshot of the
//! listener list taken when `emit` is called — a listener registered during
//! an in-flight emit only sees later emits. A panicking listener is caught
//! and logged; it never aborts the remaining listeners or the operation that
//! triggered the event.

use crate::error::Img2TextError;
use crate::options::OperationKind;
use crate::pipeline::validate::ImageInfo;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// The fixed set of observable lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    OcrStart,
    OcrComplete,
    CaptioningStart,
    CaptioningComplete,
    Error,
}

impl EventKind {
    /// Parse one of the five wire names.
    pub fn parse(name: &str) -> Result<Self, Img2TextError> {
        match name {
            "onOcrStart" => Ok(EventKind::OcrStart),
            "onOcrComplete" => Ok(EventKind::OcrComplete),
            "onCaptioningStart" => Ok(EventKind::CaptioningStart),
            "onCaptioningComplete" => Ok(EventKind::CaptioningComplete),
            "onError" => Ok(EventKind::Error),
            other => Err(Img2TextError::UnknownEvent(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::OcrStart => "onOcrStart",
            EventKind::OcrComplete => "onOcrComplete",
            EventKind::CaptioningStart => "onCaptioningStart",
            EventKind::CaptioningComplete => "onCaptioningComplete",
            EventKind::Error => "onError",
        }
    }
}

/// Data delivered to listeners.
#[derive(Debug, Clone, Serialize)]
pub struct EventPayload {
    /// Operation invocation id (matches the id in the returned output).
    pub operation_id: String,
    pub operation: OperationKind,
    pub timestamp: DateTime<Utc>,
    /// Present on start/complete events.
    pub image_info: Option<ImageInfo>,
    /// Present on `onError` events.
    pub error: Option<String>,
}

/// Opaque handle returned by [`EventBus::on`]; the only way to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&EventPayload) + Send + Sync>;

struct Listener {
    id: ListenerId,
    callback: Callback,
}

/// Listener registry, one list per event kind.
pub struct EventBus {
    listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `callback` for the event named `event` and return its id.
    pub fn on(
        &self,
        event: &str,
        callback: impl Fn(&EventPayload) + Send + Sync + 'static,
    ) -> Result<ListenerId, Img2TextError> {
        let kind = EventKind::parse(event)?;
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.lock().expect("listener lock poisoned");
        listeners.entry(kind).or_default().push(Listener {
            id,
            callback: Arc::new(callback),
        });
        Ok(id)
    }

    /// Remove the listener with `id` from the event named `event`.
    ///
    /// Returns `Ok(false)` when no such listener is registered (already
    /// removed, or registered under a different event).
    pub fn off(&self, event: &str, id: ListenerId) -> Result<bool, Img2TextError> {
        let kind = EventKind::parse(event)?;
        let mut listeners = self.listeners.lock().expect("listener lock poisoned");
        let Some(list) = listeners.get_mut(&kind) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|l| l.id != id);
        Ok(list.len() < before)
    }

    /// Dispatch `payload` to every listener registered for `kind`.
    ///
    /// Panicking listeners are isolated: the panic is caught and logged, and
    /// dispatch continues with the next listener.
    pub fn emit(&self, kind: EventKind, payload: &EventPayload) {
        let snapshot: Vec<Callback> = {
            let listeners = self.listeners.lock().expect("listener lock poisoned");
            listeners
                .get(&kind)
                .map(|list| list.iter().map(|l| Arc::clone(&l.callback)).collect())
                .unwrap_or_default()
        };

        debug!(event = kind.name(), listeners = snapshot.len(), "emit");
        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                warn!(event = kind.name(), "listener panicked; continuing dispatch");
            }
        }
    }
}
