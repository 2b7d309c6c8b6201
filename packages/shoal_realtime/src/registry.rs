//! Handler registry: event kind → registered callbacks, plus a wildcard
//! bucket that sees every event.
//!
//! Registration hands back an opaque [`HandlerId`]; closures have no
//! identity in Rust, so deregistration goes through the id. Dispatch
//! snapshots the matching handlers before invoking them, so a handler may
//! register or remove handlers without deadlocking the registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::event::{Event, EventKind};

/// Callback invoked with each matching event.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Opaque registration id returned by `on`, consumed by `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct Buckets {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(HandlerId, Handler)>>,
    any: Vec<(HandlerId, Handler)>,
}

impl Buckets {
    fn next_id(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    buckets: Mutex<Buckets>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind. Multiple handlers per kind
    /// are allowed.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut buckets = self.buckets.lock().unwrap();
        let id = buckets.next_id();
        buckets
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Register a wildcard handler invoked for every event.
    pub fn on_any<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut buckets = self.buckets.lock().unwrap();
        let id = buckets.next_id();
        buckets.any.push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Unknown ids are a no-op.
    pub fn off(&self, kind: &EventKind, id: HandlerId) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let Some(handlers) = buckets.by_kind.get_mut(kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        before != handlers.len()
    }

    /// Remove a wildcard handler. Unknown ids are a no-op.
    pub fn off_any(&self, id: HandlerId) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let before = buckets.any.len();
        buckets.any.retain(|(handler_id, _)| *handler_id != id);
        before != buckets.any.len()
    }

    /// Invoke every handler registered for the event's exact kind, then
    /// every wildcard handler, each exactly once.
    pub fn dispatch(&self, event: &Event) {
        let snapshot: Vec<Handler> = {
            let buckets = self.buckets.lock().unwrap();
            let exact = buckets
                .by_kind
                .get(&event.kind)
                .into_iter()
                .flatten()
                .map(|(_, handler)| handler.clone());
            let any = buckets.any.iter().map(|(_, handler)| handler.clone());
            exact.chain(any).collect()
        };
        if snapshot.is_empty() {
            debug!(kind = %event.kind, "no handlers for event");
            return;
        }
        for handler in snapshot {
            handler(event);
        }
    }
}
