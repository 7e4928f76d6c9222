// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The server supervisor: accepts connections, owns the snapshot cache and
//! event queue, and broadcasts host-side changes (surface, name, frame) to
//! every connected client.

use crate::connection;
use crate::events::{self, Event, EventConsumer, EventProducer};
use crate::snapshot::SnapshotCache;
use crate::surface::LockedSurface;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Duration;

/// Construction options for a [`VncServer`].
///
/// Built with a fluent `with_*` setter style; every setter consumes and
/// returns `Self` so a server can be configured in one expression.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Address to bind the listener to.
    pub host: String,
    /// TCP port to bind the listener to.
    pub port: u16,
    /// Password for full read-write access; `None` disables VNC Authentication
    /// for that access level.
    pub password: Option<String>,
    /// Password for read-only access, separate from `password`.
    pub read_only_password: Option<String>,
    /// Desktop name sent in ServerInit and on DesktopName notifications.
    pub display_name: String,
    /// Maximum number of concurrently connected clients, `None` = unlimited.
    pub max_clients: Option<usize>,
    /// Caps how often the snapshot cache re-captures the surface.
    pub max_framerate: u32,
    /// Event queue capacity; `0` means effectively unbounded.
    pub event_queue_length: usize,
    /// Enables push-frames mode for every client by default.
    pub push_requests: bool,
    /// Explicit override for read-only mode; `None` defers to
    /// [`ServerOptions::effective_read_only`]'s default rule. Set via
    /// [`ServerOptions::with_read_only`].
    read_only_override: Option<bool>,
}

impl ServerOptions {
    /// Defaults: no auth, unlimited clients, 30fps cap, unbounded event
    /// queue, push-requests off, and no read-only override (so
    /// [`ServerOptions::effective_read_only`]'s default rule applies: read-only
    /// unless both a read-write and a read-only password are set).
    pub fn new(port: u16) -> Self {
        ServerOptions {
            host: "0.0.0.0".to_string(),
            port,
            password: None,
            read_only_password: None,
            display_name: "surfacevnc".to_string(),
            max_clients: None,
            max_framerate: 30,
            event_queue_length: 0,
            push_requests: false,
            read_only_override: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_read_only_password(mut self, password: impl Into<String>) -> Self {
        self.read_only_password = Some(password.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_max_clients(mut self, max: usize) -> Self {
        self.max_clients = Some(max);
        self
    }

    pub fn with_max_framerate(mut self, fps: u32) -> Self {
        self.max_framerate = fps;
        self
    }

    pub fn with_event_queue_length(mut self, len: usize) -> Self {
        self.event_queue_length = len;
        self
    }

    pub fn with_push_requests(mut self, enabled: bool) -> Self {
        self.push_requests = enabled;
        self
    }

    pub fn with_read_only(mut self, enabled: bool) -> Self {
        self.read_only_override = Some(enabled);
        self
    }

    /// Whether connections under these options should discard input rather
    /// than publish it as events. Returns the explicit override set via
    /// [`ServerOptions::with_read_only`] if present; otherwise defaults to
    /// read-only unless both `password` and `read_only_password` are set, in
    /// which case the two-password model implies read-write access is
    /// meaningfully distinct from read-only and the default flips to `false`.
    pub fn effective_read_only(&self) -> bool {
        self.read_only_override
            .unwrap_or(!(self.password.is_some() && self.read_only_password.is_some()))
    }
}

/// Per-client flags the supervisor sets and a connection reads (and clears)
/// on its next active-loop tick. No condition variables are needed because
/// the connection loop already polls at `client_timeout` granularity.
#[derive(Default)]
pub(crate) struct ClientFlags {
    pub display_changed: AtomicBool,
    pub name_changed: AtomicBool,
    pub frame_pushed: AtomicBool,
    pub closed: AtomicBool,
}

/// State shared by every connection task: the snapshot cache, display name,
/// event queue producer, and a read-only copy of the options in effect when
/// the client connected.
pub(crate) struct ClientShared {
    pub snapshot: Arc<AsyncMutex<SnapshotCache>>,
    pub display_name: Arc<parking_lot::RwLock<String>>,
    pub event_tx: EventProducer,
    pub options: ServerOptions,
}

struct Registry {
    flags: Vec<Arc<ClientFlags>>,
}

/// The RFB server: a TCP listener, a client registry, and the shared state
/// every connection task reads from.
pub struct VncServer {
    options: ServerOptions,
    snapshot: Arc<AsyncMutex<SnapshotCache>>,
    display_name: Arc<parking_lot::RwLock<String>>,
    registry: Arc<std::sync::Mutex<Registry>>,
    client_count: Arc<AtomicUsize>,
    event_tx: EventProducer,
    event_rx: AsyncMutex<EventConsumer>,
    next_client_id: AtomicUsize,
    closed: Arc<AtomicBool>,
}

impl VncServer {
    /// Builds a server over `surface` with the given `options`. No socket is
    /// opened until [`VncServer::serve`] is called.
    pub fn new(surface: LockedSurface, options: ServerOptions) -> Self {
        let snapshot = SnapshotCache::new(surface, options.max_framerate);
        let (event_tx, event_rx) = events::channel(options.event_queue_length);
        let display_name = options.display_name.clone();
        VncServer {
            snapshot: Arc::new(AsyncMutex::new(snapshot)),
            display_name: Arc::new(parking_lot::RwLock::new(display_name)),
            registry: Arc::new(std::sync::Mutex::new(Registry { flags: Vec::new() })),
            client_count: Arc::new(AtomicUsize::new(0)),
            event_tx,
            event_rx: AsyncMutex::new(event_rx),
            next_client_id: AtomicUsize::new(0),
            closed: Arc::new(AtomicBool::new(false)),
            options,
        }
    }

    /// Replaces the surface the snapshot cache reads from. If the new handle
    /// wraps the identical surface `Arc`, only the lock is swapped and no
    /// client is invalidated; otherwise every connected client's
    /// `display_changed` flag is set so each picks up new geometry on its
    /// next tick.
    pub async fn replace_surface(&self, surface: LockedSurface) {
        let changed = self.snapshot.lock().await.replace_surface(surface);
        if changed {
            self.mark_all(|f| f.display_changed.store(true, Ordering::SeqCst));
        }
    }

    /// Updates the desktop name and marks every client's `name_changed` flag.
    pub fn set_display_name(&self, name: impl Into<String>) {
        *self.display_name.write() = name.into();
        self.mark_all(|f| f.name_changed.store(true, Ordering::SeqCst));
    }

    /// Marks every client's `frame_pushed` flag, signalling that a new frame
    /// is ready. Combined with push-requests mode this lets a host drive
    /// updates without waiting for a client's own request cadence.
    pub fn notify_frame_ready(&self) {
        self.mark_all(|f| f.frame_pushed.store(true, Ordering::SeqCst));
    }

    fn mark_all(&self, f: impl Fn(&ClientFlags)) {
        let registry = self.registry.lock().unwrap();
        for flags in &registry.flags {
            f(flags);
        }
    }

    /// Waits up to `timeout` for the next input event from any client.
    /// `None` waits indefinitely, `Some(Duration::ZERO)` polls once.
    pub async fn get_event(&self, timeout: Option<Duration>) -> Option<Event> {
        self.event_rx.lock().await.get_event(timeout).await
    }

    /// Accepts connections until [`VncServer::close`] is called.
    pub async fn serve(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind((self.options.host.as_str(), self.options.port)).await?;
        info!("surfacevnc listening on {}:{}", self.options.host, self.options.port);

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(());
            }
            let (socket, addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            };
            let _ = socket.set_nodelay(true);

            if let Some(max) = self.options.max_clients {
                if self.client_count.load(Ordering::SeqCst) >= max {
                    warn!("rejecting {addr}: {} ({max} clients)", crate::error::VncError::CapacityExceeded);
                    drop(socket);
                    continue;
                }
            }

            let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
            let flags = Arc::new(ClientFlags::default());
            self.registry.lock().unwrap().flags.push(flags.clone());
            self.client_count.fetch_add(1, Ordering::SeqCst);

            let shared = Arc::new(ClientShared {
                snapshot: self.snapshot.clone(),
                display_name: self.display_name.clone(),
                event_tx: self.event_tx.clone(),
                options: self.options.clone(),
            });
            let registry = self.registry.clone();
            let client_count = self.client_count.clone();

            tokio::spawn(async move {
                info!("client {client_id} connected from {addr}");
                if let Err(e) = connection::handle_connection(socket, client_id, shared, flags.clone()).await {
                    warn!("client {client_id} disconnected: {e}");
                }
                registry
                    .lock()
                    .unwrap()
                    .flags
                    .retain(|f| !Arc::ptr_eq(f, &flags));
                client_count.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }

    /// Closes the listener, marks every connection closed, and drains the
    /// event queue so no producer is left blocked on a full bounded queue.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.mark_all(|f| f.closed.store(true, Ordering::SeqCst));
        self.event_rx.lock().await.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_read_only_with_no_password() {
        let options = ServerOptions::new(5900);
        assert!(options.effective_read_only());
        assert!(options.password.is_none());
        assert_eq!(options.max_framerate, 30);
    }

    #[test]
    fn default_stays_read_only_with_only_one_password_set() {
        let rw_only = ServerOptions::new(5900).with_password("secret");
        assert!(rw_only.effective_read_only());

        let ro_only = ServerOptions::new(5900).with_read_only_password("secret");
        assert!(ro_only.effective_read_only());
    }

    #[test]
    fn default_flips_to_read_write_when_both_passwords_are_set() {
        let options = ServerOptions::new(5900)
            .with_password("rw")
            .with_read_only_password("ro");
        assert!(!options.effective_read_only());
    }

    #[test]
    fn explicit_override_wins_over_the_default_rule() {
        let options = ServerOptions::new(5900)
            .with_password("rw")
            .with_read_only_password("ro")
            .with_read_only(true);
        assert!(options.effective_read_only());
    }

    #[test]
    fn builder_chains_apply_in_order() {
        let options = ServerOptions::new(5900)
            .with_password("secret")
            .with_max_clients(4)
            .with_read_only(false);
        assert_eq!(options.password.as_deref(), Some("secret"));
        assert_eq!(options.max_clients, Some(4));
        assert!(!options.effective_read_only());
    }
}
