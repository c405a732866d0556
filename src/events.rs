use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::GatorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ResultReceived,
    Error,
    RequestComplete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::ResultReceived => write!(f, "resultReceived"),
            EventKind::Error => write!(f, "error"),
            EventKind::RequestComplete => write!(f, "requestComplete"),
        }
    }
}

/// Where an event is delivered: one service instance, or every listener on
/// the service type as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Global,
    Instance(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub kind: EventKind,
    pub service: String,
    pub accession: String,
    pub request_id: u64,
    pub error: Option<GatorError>,
}

pub type Handler = Arc<dyn Fn(&ServiceEvent) + Send + Sync>;

struct Listener {
    id: ListenerId,
    target: Target,
    kind: EventKind,
    namespace: Option<String>,
    handler: Handler,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    listeners: Vec<Listener>,
}

/// Synchronous publish/subscribe hub shared by services, the scheduler and
/// observers.
#[derive(Default)]
pub struct EventBus {
    state: Mutex<BusState>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, target: Target, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&ServiceEvent) + Send + Sync + 'static,
    {
        self.register(target, kind, None, Arc::new(handler))
    }

    /// Like [`EventBus::on`], but the listener can later be removed together
    /// with everything else registered under `namespace`.
    pub fn on_namespaced<F>(
        &self,
        target: Target,
        kind: EventKind,
        namespace: &str,
        handler: F,
    ) -> ListenerId
    where
        F: Fn(&ServiceEvent) + Send + Sync + 'static,
    {
        self.register(target, kind, Some(namespace.to_string()), Arc::new(handler))
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.listeners.len();
        state.listeners.retain(|listener| listener.id != id);
        state.listeners.len() != before
    }

    pub fn off_namespace(&self, target: Target, namespace: &str) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.listeners.len();
        state.listeners.retain(|listener| {
            listener.target != target || listener.namespace.as_deref() != Some(namespace)
        });
        before - state.listeners.len()
    }

    /// Calls every handler registered for `(target, event.kind)`. Handlers
    /// run outside the lock and may subscribe or unsubscribe freely.
    pub fn emit(&self, target: Target, event: &ServiceEvent) {
        let handlers: Vec<Handler> = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state
                .listeners
                .iter()
                .filter(|listener| listener.target == target && listener.kind == event.kind)
                .map(|listener| listener.handler.clone())
                .collect()
        };
        for handler in handlers {
            handler(event);
        }
    }

    pub fn listener_count(&self, target: Target) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .listeners
            .iter()
            .filter(|listener| listener.target == target)
            .count()
    }

    fn register(
        &self,
        target: Target,
        kind: EventKind,
        namespace: Option<String>,
        handler: Handler,
    ) -> ListenerId {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_id += 1;
        let id = ListenerId(state.next_id);
        state.listeners.push(Listener {
            id,
            target,
            kind,
            namespace,
            handler,
        });
        id
    }
}
