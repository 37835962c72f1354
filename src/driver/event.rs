//! Driver Lifecycle Events
//!
//! Connection-level notifications a driver publishes to its listeners.

use std::fmt;
use std::sync::{Arc, Mutex};

// == Event Kind ==
/// The lifecycle transitions a driver reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverEventKind {
    /// A request hit a connectivity problem
    Issue,
    /// Too many consecutive problems; the connection is considered failed
    Failure,
    /// A new connection will be attempted on the next request
    Reconnecting,
    /// A connection was re-established after a failure
    Reconnect,
    /// The failed connection was discarded
    Remove,
}

impl DriverEventKind {
    /// Every kind, in the order they are usually observed.
    pub const ALL: [DriverEventKind; 5] = [
        DriverEventKind::Issue,
        DriverEventKind::Failure,
        DriverEventKind::Reconnecting,
        DriverEventKind::Reconnect,
        DriverEventKind::Remove,
    ];

    /// Wire-style event name.
    pub fn name(self) -> &'static str {
        match self {
            DriverEventKind::Issue => "issue",
            DriverEventKind::Failure => "failure",
            DriverEventKind::Reconnecting => "reconnecting",
            DriverEventKind::Reconnect => "reconnect",
            DriverEventKind::Remove => "remove",
        }
    }
}

impl fmt::Display for DriverEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// == Driver Event ==
/// A lifecycle event with its detail payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverEvent {
    pub kind: DriverEventKind,
    /// Endpoint(s) the event concerns
    pub server: String,
    /// Human-readable detail, usually the underlying error
    pub detail: String,
}

impl DriverEvent {
    pub fn new(kind: DriverEventKind, server: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            server: server.into(),
            detail: detail.into(),
        }
    }
}

/// Callback invoked for every emitted event.
pub type EventListener = Arc<dyn Fn(&DriverEvent) + Send + Sync>;

// == Listener Set ==
/// Registered listeners of a driver.
#[derive(Default, Clone)]
pub struct Listeners {
    inner: Arc<Mutex<Vec<EventListener>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: EventListener) {
        if let Ok(mut listeners) = self.inner.lock() {
            listeners.push(listener);
        }
    }

    /// Delivers `event` to every listener.
    ///
    /// The list is snapshotted first so listeners may register further listeners.
    pub fn emit(&self, event: &DriverEvent) {
        let snapshot: Vec<EventListener> = match self.inner.lock() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return,
        };
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners").field("count", &self.len()).finish()
    }
}
