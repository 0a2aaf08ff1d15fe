//! WebSocket broadcast server: accept loop and per-client session tasks.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting connections and upgrading each one to a WebSocket session.
//! 3. Tracking the set of connected clients.
//! 4. Fanning each serial line out to every open client as one text frame.
//! 5. Forwarding every message a client sends to the bridge's inbound queue.
//! 6. Closing all sessions and releasing the port on [`BroadcastServer::stop`].
//!
//! # Concurrency
//!
//! Each client runs in its own Tokio task owned by a `JoinSet` inside the
//! accept loop.  The client set is a `std::sync::Mutex<HashMap>` that is never
//! held across an `.await`.  Broadcasting uses `try_send` on each session's
//! bounded outbox: a client that stops reading loses lines once its outbox is
//! full, and never delays the others.  Inbound messages go through a bounded
//! queue too; a session whose queue is full stops reading its socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{BindError, CloseError, EventHub, StatusEvent};

/// How long `stop` waits for clients to finish the close handshake before
/// dropping their connections.
pub const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Frames queued per client before further lines are dropped for it.
pub const OUTBOX_CAPACITY: usize = 128;

/// A message received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub client: Uuid,
    pub text: String,
}

/// Per-client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Open,
    /// A close frame has been queued; no further broadcasts are sent.
    Closing,
}

enum Outbound {
    Text(String),
    Close,
}

struct ClientEntry {
    peer: SocketAddr,
    state: ClientState,
    outbox: mpsc::Sender<Outbound>,
}

type ClientSet = Arc<Mutex<HashMap<Uuid, ClientEntry>>>;

fn lock_clients(clients: &ClientSet) -> MutexGuard<'_, HashMap<Uuid, ClientEntry>> {
    clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Broadcast handle ──────────────────────────────────────────────────────────

/// Cloneable access to the client set for broadcasting.
#[derive(Clone)]
pub struct BroadcastHandle {
    clients: ClientSet,
}

impl BroadcastHandle {
    /// Sends `text` as one text frame to every open client.
    ///
    /// Returns the number of clients the frame was queued for.  With no
    /// clients connected the line is discarded.  A client whose outbox is
    /// full is skipped and not counted.
    pub fn broadcast(&self, text: &str) -> usize {
        let clients = lock_clients(&self.clients);
        if clients.is_empty() {
            debug!("no WebSocket clients connected; line discarded");
            return 0;
        }
        let mut delivered = 0;
        for (id, entry) in clients.iter() {
            if entry.state != ClientState::Open {
                continue;
            }
            match entry.outbox.try_send(Outbound::Text(text.to_string())) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("client {id} is not keeping up; line dropped for it");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Queues a close frame for every open client.  Returns how many.
    pub fn close_all(&self) -> usize {
        let mut clients = lock_clients(&self.clients);
        let mut closed = 0;
        for entry in clients.values_mut() {
            if entry.state == ClientState::Open {
                entry.state = ClientState::Closing;
                if entry.outbox.try_send(Outbound::Close).is_ok() {
                    closed += 1;
                }
            }
        }
        closed
    }

    pub fn client_count(&self) -> usize {
        lock_clients(&self.clients).len()
    }

    /// `(client, peer, state)` for every tracked client.
    pub fn clients(&self) -> Vec<(Uuid, SocketAddr, ClientState)> {
        lock_clients(&self.clients)
            .iter()
            .map(|(id, c)| (*id, c.peer, c.state))
            .collect()
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// A listening WebSocket server and its connected clients.
pub struct BroadcastServer {
    local_addr: SocketAddr,
    handle: BroadcastHandle,
    shutdown: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
    events: Arc<EventHub>,
}

impl BroadcastServer {
    /// Binds `addr` and starts accepting clients.
    ///
    /// Every message a client sends is pushed onto `inbound`.
    ///
    /// # Errors
    ///
    /// [`BindError::AddrInUse`] if the port is taken, [`BindError::Io`] for any
    /// other bind failure.  A `ServerError` status is raised in both cases.
    pub async fn listen(
        addr: SocketAddr,
        inbound: mpsc::Sender<InboundMessage>,
        events: Arc<EventHub>,
    ) -> Result<Self, BindError> {
        let listener = match bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!("WebSocket server failed to start: {e}");
                events.emit_status(StatusEvent::ServerError {
                    addr,
                    message: e.to_string(),
                });
                return Err(e);
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|source| BindError::Io { addr, source })?;

        let clients: ClientSet = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&clients),
            inbound,
            Arc::clone(&events),
            shutdown_rx,
        ));

        info!("WebSocket server listening on ws://{local_addr}");
        events.emit_status(StatusEvent::ServerListening { addr: local_addr });

        Ok(Self {
            local_addr,
            handle: BroadcastHandle { clients },
            shutdown,
            accept_task: Some(accept_task),
            events,
        })
    }

    /// The bound address.  Differs from the requested one when port 0 was used.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> BroadcastHandle {
        self.handle.clone()
    }

    pub fn broadcast(&self, text: &str) -> usize {
        self.handle.broadcast(text)
    }

    pub fn close_all(&self) -> usize {
        self.handle.close_all()
    }

    pub fn client_count(&self) -> usize {
        self.handle.client_count()
    }

    pub fn is_listening(&self) -> bool {
        self.accept_task.is_some()
    }

    /// Closes every client, stops accepting, and releases the port.
    ///
    /// Returns once the listener is dropped.  Calling `stop` again is a no-op.
    ///
    /// # Errors
    ///
    /// [`CloseError::AcceptLoopPanicked`] if the accept loop panicked; the
    /// listener is gone either way.
    pub async fn stop(&mut self) -> Result<(), CloseError> {
        let Some(task) = self.accept_task.take() else {
            return Ok(());
        };

        let closing = self.handle.close_all();
        debug!("closing {closing} WebSocket client(s)");
        self.shutdown.send_replace(true);
        let joined = task.await;

        info!("WebSocket server on {} stopped", self.local_addr);
        self.events.emit_status(StatusEvent::ServerStopped {
            addr: self.local_addr,
        });

        joined.map_err(|e| CloseError::AcceptLoopPanicked(e.to_string()))
    }
}

impl Drop for BroadcastServer {
    fn drop(&mut self) {
        if self.accept_task.is_some() {
            self.shutdown.send_replace(true);
        }
    }
}

impl std::fmt::Debug for BroadcastServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastServer")
            .field("local_addr", &self.local_addr)
            .field("clients", &self.handle.client_count())
            .field("listening", &self.is_listening())
            .finish()
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, BindError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| BindError::from_io(addr, e))
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    clients: ClientSet,
    inbound: mpsc::Sender<InboundMessage>,
    events: Arc<EventHub>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("TCP connection from {peer}");
                    sessions.spawn(run_session(
                        stream,
                        peer,
                        Arc::clone(&clients),
                        inbound.clone(),
                        Arc::clone(&events),
                    ));
                }
                Err(e) => {
                    // Transient (e.g. too many open files); keep serving.
                    error!("accept error: {e}");
                }
            },
            Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = finished {
                    warn!("client session task failed: {e}");
                }
            }
        }
    }

    // Release the port before waiting on the sessions.
    drop(listener);

    let drained = timeout(CLOSE_GRACE, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        debug!(
            "{} client(s) did not finish the close handshake; dropping them",
            sessions.len()
        );
        sessions.shutdown().await;
    }

    let dropped: Vec<Uuid> = lock_clients(&clients).drain().map(|(id, _)| id).collect();
    for client in dropped {
        events.emit_status(StatusEvent::ClientDisconnected { client });
    }
}

// ── Per-client session ────────────────────────────────────────────────────────

async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    clients: ClientSet,
    inbound: mpsc::Sender<InboundMessage>,
    events: Arc<EventHub>,
) {
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {peer} failed: {e}");
            return;
        }
    };

    let client = Uuid::new_v4();
    let (outbox, mut outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
    lock_clients(&clients).insert(
        client,
        ClientEntry {
            peer,
            state: ClientState::Open,
            outbox,
        },
    );
    info!("client {client} connected from {peer}");
    events.emit_status(StatusEvent::ClientConnected { client, peer });

    loop {
        tokio::select! {
            incoming = ws.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => forward(&inbound, client, text).await,
                Some(Ok(WsMessage::Binary(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    forward(&inbound, client, text).await;
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    // The reply is flushed by the next poll, which then ends the stream.
                    debug!("client {client} sent close: {frame:?}");
                }
                // Ping/pong are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => break,
                Some(Err(e)) => {
                    debug!("client {client} read error: {e}");
                    break;
                }
            },
            outgoing = outbox_rx.recv() => match outgoing {
                Some(Outbound::Text(line)) => {
                    if let Err(e) = ws.send(WsMessage::Text(line)).await {
                        debug!("send to client {client} failed: {e}");
                        break;
                    }
                }
                Some(Outbound::Close) => {
                    if let Err(e) = ws.close(None).await {
                        debug!("close to client {client} failed: {e}");
                        break;
                    }
                }
                // Entry removed by the accept loop.
                None => break,
            },
        }
    }

    if lock_clients(&clients).remove(&client).is_some() {
        info!("client {client} disconnected");
        events.emit_status(StatusEvent::ClientDisconnected { client });
    }
}

/// Waits for room on the inbound queue, so a flooding client is held back
/// instead of queueing without limit.
async fn forward(inbound: &mpsc::Sender<InboundMessage>, client: Uuid, text: String) {
    debug!("client {client} sent {text:?}");
    if inbound.send(InboundMessage { client, text }).await.is_err() {
        debug!("inbound queue closed; dropping message from {client}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::connect_async;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn wait_for_clients(server: &BroadcastServer, n: usize) {
        for _ in 0..200 {
            if server.client_count() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {n} clients, have {}", server.client_count());
    }

    #[tokio::test]
    async fn test_broadcast_with_no_clients_sends_nothing() {
        let (tx, _rx) = mpsc::channel(16);
        let mut server = BroadcastServer::listen(loopback(), tx, Arc::new(EventHub::new()))
            .await
            .unwrap();

        assert_eq!(server.broadcast("12.5"), 0);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_reaches_client_without_newline() {
        // Arrange
        let (tx, _rx) = mpsc::channel(16);
        let mut server = BroadcastServer::listen(loopback(), tx, Arc::new(EventHub::new()))
            .await
            .unwrap();
        let url = format!("ws://{}", server.local_addr());
        let (mut client, _) = connect_async(url).await.unwrap();
        wait_for_clients(&server, 1).await;

        // Act
        let sent = server.broadcast("12.5");
        let frame = timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // Assert
        assert_eq!(sent, 1);
        assert_eq!(frame, WsMessage::Text("12.5".to_string()));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_client_messages_are_forwarded_inbound() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut server = BroadcastServer::listen(loopback(), tx, Arc::new(EventHub::new()))
            .await
            .unwrap();
        let url = format!("ws://{}", server.local_addr());
        let (mut client, _) = connect_async(url).await.unwrap();

        client
            .send(WsMessage::Text("MEAS?".to_string()))
            .await
            .unwrap();
        let msg = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(msg.text, "MEAS?");
        server.stop().await.unwrap();
    }

    fn entry(outbox: mpsc::Sender<Outbound>) -> ClientEntry {
        ClientEntry {
            peer: loopback(),
            state: ClientState::Open,
            outbox,
        }
    }

    #[test]
    fn test_stalled_client_does_not_hold_back_others() {
        // Arrange: one client never drains its outbox, the other keeps up
        let (stalled_tx, stalled_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let (healthy_tx, mut healthy_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let stalled = Uuid::new_v4();
        let healthy = Uuid::new_v4();
        let clients: ClientSet = Arc::new(Mutex::new(HashMap::from([
            (stalled, entry(stalled_tx)),
            (healthy, entry(healthy_tx)),
        ])));
        let handle = BroadcastHandle { clients };
        let total = OUTBOX_CAPACITY + 10;

        // Act
        let mut counts = Vec::with_capacity(total);
        let mut received = Vec::with_capacity(total);
        for i in 0..total {
            counts.push(handle.broadcast(&format!("line {i}")));
            while let Ok(Outbound::Text(line)) = healthy_rx.try_recv() {
                received.push(line);
            }
        }

        // Assert: the stalled outbox stops at capacity, the other gets everything
        assert!(counts[..OUTBOX_CAPACITY].iter().all(|&n| n == 2));
        assert!(counts[OUTBOX_CAPACITY..].iter().all(|&n| n == 1));
        assert_eq!(stalled_rx.len(), OUTBOX_CAPACITY);
        assert_eq!(received.len(), total);
        assert_eq!(received.last(), Some(&format!("line {}", total - 1)));
    }

    #[tokio::test]
    async fn test_full_inbound_queue_holds_messages_back_without_loss() {
        // Arrange: room for one message at a time
        let (tx, mut rx) = mpsc::channel(1);
        let mut server = BroadcastServer::listen(loopback(), tx, Arc::new(EventHub::new()))
            .await
            .unwrap();
        let url = format!("ws://{}", server.local_addr());
        let (mut client, _) = connect_async(url).await.unwrap();

        // Act
        for i in 0..5 {
            client
                .send(WsMessage::Text(format!("cmd {i}")))
                .await
                .unwrap();
        }
        let mut texts = Vec::new();
        for _ in 0..5 {
            let msg = timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            texts.push(msg.text);
        }

        // Assert
        assert_eq!(texts, vec!["cmd 0", "cmd 1", "cmd 2", "cmd 3", "cmd 4"]);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_closes_clients_and_releases_port() {
        // Arrange
        let (tx, _rx) = mpsc::channel(16);
        let mut server = BroadcastServer::listen(loopback(), tx, Arc::new(EventHub::new()))
            .await
            .unwrap();
        let addr = server.local_addr();
        let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        wait_for_clients(&server, 1).await;

        // Act
        server.stop().await.unwrap();

        // Assert: the client sees a close, and the port can be bound again
        let next = timeout(Duration::from_secs(2), client.next()).await.unwrap();
        assert!(matches!(next, Some(Ok(WsMessage::Close(_))) | None | Some(Err(_))));
        assert_eq!(server.client_count(), 0);
        let rebound = TcpListener::bind(addr).await;
        assert!(rebound.is_ok(), "port must be free after stop");
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (tx, _rx) = mpsc::channel(16);
        let mut server = BroadcastServer::listen(loopback(), tx, Arc::new(EventHub::new()))
            .await
            .unwrap();

        server.stop().await.unwrap();
        server.stop().await.unwrap();

        assert!(!server.is_listening());
    }

    #[tokio::test]
    async fn test_listen_on_taken_port_is_addr_in_use() {
        let (tx, _rx) = mpsc::channel(16);
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = holder.local_addr().unwrap();

        let result = BroadcastServer::listen(addr, tx, Arc::new(EventHub::new())).await;

        assert!(matches!(result, Err(BindError::AddrInUse { .. })));
    }
}
