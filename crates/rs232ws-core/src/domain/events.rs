//! Bridge notifications and the observer registry that dispatches them.
//!
//! The bridge raises exactly two kinds of notification to the outside world:
//!
//! - **`data`** – one per line parsed from the serial device.
//! - **`status`** – one per lifecycle transition of the serial endpoint or the
//!   broadcast server, including errors.
//!
//! Observers register a callback per [`EventKind`] with [`EventHub::subscribe`]
//! and receive a [`SubscriptionId`].  Removing a subscription uses that id, so
//! the same closure may be subscribed twice and each registration is removed
//! independently.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

/// Which stream of notifications a subscriber wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Data,
    Status,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Data => "data",
            EventKind::Status => "status",
        }
    }
}

/// A lifecycle transition or error reported by the bridge.
///
/// The [`Display`](fmt::Display) form is the status string handed to
/// presentation collaborators, e.g. `serial:open COM3 @ 9600`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    SerialOpening { path: String, baud_rate: u32 },
    SerialOpen { path: String, baud_rate: u32 },
    SerialClosing { path: String },
    SerialClosed { path: String },
    SerialError { path: String, message: String },
    /// The serial side is switched off in the configuration.
    SerialDisabled,
    ServerListening { addr: SocketAddr },
    ServerStopped { addr: SocketAddr },
    ServerError { addr: SocketAddr, message: String },
    ClientConnected { client: Uuid, peer: SocketAddr },
    ClientDisconnected { client: Uuid },
    /// A reconfiguration started; `what` names the part being rebuilt.
    Reconfiguring { what: &'static str },
    /// A reconfiguration request arrived while another one was in flight.
    ReconfigurationRejected { reason: String },
    BridgeStopped,
}

impl StatusEvent {
    /// `true` for the variants that describe a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            StatusEvent::SerialError { .. } | StatusEvent::ServerError { .. }
        )
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::SerialOpening { path, baud_rate } => {
                write!(f, "serial:opening {path} @ {baud_rate}")
            }
            StatusEvent::SerialOpen { path, baud_rate } => {
                write!(f, "serial:open {path} @ {baud_rate}")
            }
            StatusEvent::SerialClosing { path } => write!(f, "serial:closing {path}"),
            StatusEvent::SerialClosed { path } => write!(f, "serial:closed {path}"),
            StatusEvent::SerialError { path, message } => {
                write!(f, "serial:error {path}: {message}")
            }
            StatusEvent::SerialDisabled => f.write_str("serial:disabled"),
            StatusEvent::ServerListening { addr } => write!(f, "server:listening {addr}"),
            StatusEvent::ServerStopped { addr } => write!(f, "server:stopped {addr}"),
            StatusEvent::ServerError { addr, message } => {
                write!(f, "server:error {addr}: {message}")
            }
            StatusEvent::ClientConnected { client, peer } => {
                write!(f, "client:connected {client} ({peer})")
            }
            StatusEvent::ClientDisconnected { client } => {
                write!(f, "client:disconnected {client}")
            }
            StatusEvent::Reconfiguring { what } => write!(f, "bridge:reconfiguring {what}"),
            StatusEvent::ReconfigurationRejected { reason } => {
                write!(f, "bridge:reconfiguration-rejected {reason}")
            }
            StatusEvent::BridgeStopped => f.write_str("bridge:stopped"),
        }
    }
}

/// A notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// One line from the serial device, terminator stripped.
    Data(String),
    Status(StatusEvent),
}

impl BridgeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BridgeEvent::Data(_) => EventKind::Data,
            BridgeEvent::Status(_) => EventKind::Status,
        }
    }
}

/// Handle returned by [`EventHub::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&BridgeEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    callback: Callback,
}

/// Typed multi-subscriber dispatch for bridge events.
///
/// `EventHub` is shared (`Arc<EventHub>`) between the bridge components that
/// raise events and the owner that registers observers.  Callbacks run on the
/// thread that raised the event, which may be a Tokio worker or the blocking
/// serial reader thread, so they should return quickly.
///
/// The subscriber list lock is not held while callbacks run: a callback may
/// subscribe or unsubscribe without deadlocking.
pub struct EventHub {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscription>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers `callback` for every event of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Subscription {
            id,
            kind,
            callback: Arc::new(callback),
        });
        id
    }

    /// Removes one subscription.  Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.lock();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Delivers `event` to every subscriber of its kind.
    pub fn emit(&self, event: BridgeEvent) {
        let kind = event.kind();
        let targets: Vec<Callback> = self
            .lock()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| Arc::clone(&s.callback))
            .collect();

        for callback in targets {
            callback(&event);
        }
    }

    pub fn emit_data(&self, line: impl Into<String>) {
        self.emit(BridgeEvent::Data(line.into()));
    }

    pub fn emit_status(&self, status: StatusEvent) {
        self.emit(BridgeEvent::Status(status));
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.lock().iter().filter(|s| s.kind == kind).count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscription>> {
        // A panicking callback never runs under this lock, so the list itself
        // is always consistent.
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("data_subscribers", &self.subscriber_count(EventKind::Data))
            .field("status_subscribers", &self.subscriber_count(EventKind::Status))
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(hub: &EventHub, kind: EventKind) -> (SubscriptionId, Arc<Mutex<Vec<BridgeEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = hub.subscribe(kind, move |e| sink.lock().unwrap().push(e.clone()));
        (id, seen)
    }

    #[test]
    fn test_data_event_reaches_data_subscriber_only() {
        // Arrange
        let hub = EventHub::new();
        let (_, data) = recorder(&hub, EventKind::Data);
        let (_, status) = recorder(&hub, EventKind::Status);

        // Act
        hub.emit_data("12.5");

        // Assert
        assert_eq!(*data.lock().unwrap(), vec![BridgeEvent::Data("12.5".into())]);
        assert!(status.lock().unwrap().is_empty());
    }

    #[test]
    fn test_all_subscribers_of_a_kind_are_invoked() {
        let hub = EventHub::new();
        let (_, a) = recorder(&hub, EventKind::Status);
        let (_, b) = recorder(&hub, EventKind::Status);

        hub.emit_status(StatusEvent::SerialDisabled);

        assert_eq!(a.lock().unwrap().len(), 1);
        assert_eq!(b.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_subscriptions_are_independent() {
        // Arrange: the same closure body registered twice
        let hub = EventHub::new();
        let count = Arc::new(AtomicU64::new(0));
        let make = |c: Arc<AtomicU64>| {
            move |_: &BridgeEvent| {
                c.fetch_add(1, Ordering::SeqCst);
            }
        };
        let first = hub.subscribe(EventKind::Data, make(Arc::clone(&count)));
        let second = hub.subscribe(EventKind::Data, make(Arc::clone(&count)));

        // Act
        hub.emit_data("x");
        assert!(hub.unsubscribe(first));
        hub.emit_data("y");

        // Assert: 2 deliveries for "x", 1 for "y"
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_ne!(first, second);
    }

    #[test]
    fn test_unsubscribe_unknown_id_returns_false() {
        let hub = EventHub::new();
        let (id, _) = recorder(&hub, EventKind::Data);
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
    }

    #[test]
    fn test_callback_may_unsubscribe_itself_without_deadlock() {
        let hub = Arc::new(EventHub::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let hub_ref = Arc::clone(&hub);
        let slot_ref = Arc::clone(&slot);
        let id = hub.subscribe(EventKind::Data, move |_| {
            if let Some(id) = slot_ref.lock().unwrap().take() {
                hub_ref.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        hub.emit_data("once");

        assert_eq!(hub.subscriber_count(EventKind::Data), 0);
    }

    #[test]
    fn test_status_strings_are_stable() {
        let addr: SocketAddr = "127.0.0.1:58081".parse().unwrap();
        assert_eq!(
            StatusEvent::SerialOpen { path: "COM3".into(), baud_rate: 9600 }.to_string(),
            "serial:open COM3 @ 9600"
        );
        assert_eq!(
            StatusEvent::ServerListening { addr }.to_string(),
            "server:listening 127.0.0.1:58081"
        );
        assert_eq!(
            StatusEvent::SerialError { path: "COM3".into(), message: "gone".into() }.to_string(),
            "serial:error COM3: gone"
        );
        assert_eq!(StatusEvent::BridgeStopped.to_string(), "bridge:stopped");
    }

    #[test]
    fn test_is_error_flags_only_failures() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        assert!(StatusEvent::ServerError { addr, message: "in use".into() }.is_error());
        assert!(!StatusEvent::ServerListening { addr }.is_error());
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::Data.as_str(), "data");
        assert_eq!(BridgeEvent::Status(StatusEvent::BridgeStopped).kind(), EventKind::Status);
    }
}
