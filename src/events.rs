//! Input events published by connections and consumed by the host
//! application through a single shared, bounded queue.

use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::Duration;

/// One input event, tagged with the wall-clock time it was recorded.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: f64,
}

/// The payload of an [`Event`].
#[derive(Debug, Clone, Copy)]
pub enum EventKind {
    /// A key was pressed (`down = true`) or released.
    KeyEvent { key: u32, down: bool },
    /// The pointer moved to a new absolute position.
    PointerMove { x: u16, y: u16, buttons: u8 },
    /// A single pointer button changed state.
    PointerClick { x: u16, y: u16, button: u8, down: bool },
}

impl Event {
    fn now(kind: EventKind) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Event { kind, timestamp }
    }

    /// Builds a key event stamped with the current time.
    pub fn key(key: u32, down: bool) -> Self {
        Event::now(EventKind::KeyEvent { key, down })
    }

    /// Builds a pointer-move event stamped with the current time.
    pub fn pointer_move(x: u16, y: u16, buttons: u8) -> Self {
        Event::now(EventKind::PointerMove { x, y, buttons })
    }

    /// Builds a pointer-click event stamped with the current time.
    pub fn pointer_click(x: u16, y: u16, button: u8, down: bool) -> Self {
        Event::now(EventKind::PointerClick { x, y, button, down })
    }
}

/// The producer half of the shared event queue, held by every connection.
#[derive(Clone)]
pub struct EventProducer {
    tx: mpsc::Sender<Event>,
}

impl EventProducer {
    /// Publishes an event, blocking (exerting backpressure on the calling
    /// connection) if the queue is full.
    pub async fn publish(&self, event: Event) {
        // A closed receiver means the host has shut down; drop silently
        // rather than panicking a connection task on send failure.
        let _ = self.tx.send(event).await;
    }
}

/// The consumer half, held by the server supervisor and exposed to the host
/// application via `VncServer::get_event`.
pub struct EventConsumer {
    rx: mpsc::Receiver<Event>,
}

impl EventConsumer {
    /// Returns the next event, waiting up to `timeout`. `None` means either
    /// the timeout elapsed or the queue was closed (server shutting down).
    /// `timeout = None` waits indefinitely; `Some(Duration::ZERO)` polls once.
    pub async fn get_event(&mut self, timeout: Option<Duration>) -> Option<Event> {
        match timeout {
            None => self.rx.recv().await,
            Some(d) if d.is_zero() => self.rx.try_recv().ok(),
            Some(d) => tokio::time::timeout(d, self.rx.recv()).await.ok().flatten(),
        }
    }

    /// Drains every currently queued event without blocking. Used during
    /// server shutdown so that any producer still awaiting a full bounded
    /// queue gets unblocked rather than hanging forever.
    pub fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

/// Builds a bounded (or, with `capacity = 0`, effectively unbounded) event
/// queue and returns its producer/consumer halves.
pub fn channel(capacity: usize) -> (EventProducer, EventConsumer) {
    let capacity = if capacity == 0 { 1 << 20 } else { capacity };
    let (tx, rx) = mpsc::channel(capacity);
    (EventProducer { tx }, EventConsumer { rx })
}
