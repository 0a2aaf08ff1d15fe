//! The bridge controller: owns one serial endpoint and one broadcast server
//! and moves lines between them.
//!
//! # Data flow
//!
//! ```text
//!  serial read loop ──lines──► line pump ──► EventHub (data)
//!                                   └──────► BroadcastServer ──► every client
//!
//!  client ──► session task ──inbound──► inbound pump ──► SerialHandle::write_line
//! ```
//!
//! The pumps look the current leaf up through a `watch` slot on every message,
//! so they never hold on to a connection that has been replaced.  A leaf that
//! fails to open leaves its slot empty: lines then go nowhere and client
//! messages are dropped with a warning, but the other side keeps working.
//!
//! Leaf errors are reported as `status` events and log lines.  They are never
//! returned from the reconfiguration methods.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{
    BridgeConfig, CloseError, ConfigError, EnumerationError, EventHub, PortDescriptor, PortStatus,
    StatusEvent, TeardownError,
};
use crate::infrastructure::serial::{
    PortEnumerator, SerialEndpoint, SerialHandle, SerialOpener, SystemPortEnumerator,
    SystemSerialOpener, DEFAULT_OPEN_TIMEOUT,
};
use crate::infrastructure::ws_server::{BroadcastHandle, BroadcastServer, InboundMessage};

/// Lines buffered between the serial reader and the line pump.
const LINE_QUEUE_DEPTH: usize = 256;

/// Client messages waiting for the serial writer.  When full, client sessions
/// stop reading their sockets until the device catches up.
const INBOUND_QUEUE_DEPTH: usize = 64;

/// The external collaborators a controller is built from.
#[derive(Clone)]
pub struct BridgeDeps {
    pub opener: Arc<dyn SerialOpener>,
    pub enumerator: Arc<dyn PortEnumerator>,
    pub open_timeout: Duration,
}

impl BridgeDeps {
    /// Real serial devices through `serialport`.
    pub fn system() -> Self {
        Self {
            opener: Arc::new(SystemSerialOpener),
            enumerator: Arc::new(SystemPortEnumerator),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }

    pub fn with_open_timeout(mut self, open_timeout: Duration) -> Self {
        self.open_timeout = open_timeout;
        self
    }
}

impl std::fmt::Debug for BridgeDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeDeps")
            .field("open_timeout", &self.open_timeout)
            .finish_non_exhaustive()
    }
}

/// Outcome of a reconfiguration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconfigured {
    /// The requested value equals the current one; nothing was touched.
    Unchanged,
    /// The affected leaf was rebuilt and is up.
    Applied,
    /// The new value is in effect but the affected leaf failed to come up.
    Degraded,
}

/// Owner of the two leaves and the pumps between them.
///
/// Reconfiguration methods take `&mut self`, so a controller is never seen
/// half-way through a change; the transition is reported as a
/// `Reconfiguring` status event instead.  `shutdown` consumes the controller.
pub struct BridgeController {
    config: BridgeConfig,
    deps: BridgeDeps,
    events: Arc<EventHub>,
    serial: Option<SerialEndpoint>,
    server: Option<BroadcastServer>,
    serial_slot: watch::Sender<Option<SerialHandle>>,
    server_slot: watch::Sender<Option<BroadcastHandle>>,
    lines_tx: mpsc::Sender<String>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    pumps: Vec<JoinHandle<()>>,
}

impl BridgeController {
    /// Starts the broadcast server and, if enabled, the serial endpoint.
    ///
    /// Never fails: a leaf that cannot start is reported on `events` and left
    /// absent.
    pub async fn start(config: BridgeConfig, deps: BridgeDeps, events: Arc<EventHub>) -> Self {
        let (lines_tx, lines_rx) = mpsc::channel(LINE_QUEUE_DEPTH);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let (serial_slot, serial_watch) = watch::channel(None);
        let (server_slot, server_watch) = watch::channel(None);

        let pumps = vec![
            tokio::spawn(pump_lines(lines_rx, server_watch, Arc::clone(&events))),
            tokio::spawn(pump_inbound(inbound_rx, serial_watch)),
        ];

        let mut controller = Self {
            config,
            deps,
            events,
            serial: None,
            server: None,
            serial_slot,
            server_slot,
            lines_tx,
            inbound_tx,
            pumps,
        };

        info!("starting bridge: {}", controller.config);
        controller.start_server().await;
        controller.start_serial().await;
        controller
    }

    // ── Reconfiguration ───────────────────────────────────────────────────────

    /// Moves the broadcast server to `port`.
    ///
    /// Connected clients are closed; the old port is released before the new
    /// one is bound.  The serial side is untouched.
    ///
    /// # Errors
    ///
    /// [`ConfigError::OutOfRange`] for port 0.  Nothing is changed in that case.
    pub async fn set_listen_port(&mut self, port: u16) -> Result<Reconfigured, ConfigError> {
        if port == self.config.listen_port() {
            debug!("listen port already {port}; nothing to do");
            return Ok(Reconfigured::Unchanged);
        }
        let next = self.config.with_listen_port(port)?;

        self.begin("listen port");
        if let Err(e) = self.stop_server().await {
            error!("stopping WebSocket server: {e}");
        }
        self.config = next;
        let up = self.start_server().await;

        Ok(outcome(up))
    }

    /// Reopens the serial device at `baud_rate`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::OutOfRange`] for a zero baud rate.
    pub async fn set_baud_rate(&mut self, baud_rate: u32) -> Result<Reconfigured, ConfigError> {
        if baud_rate == self.config.baud_rate() {
            debug!("baud rate already {baud_rate}; nothing to do");
            return Ok(Reconfigured::Unchanged);
        }
        let next = self.config.with_baud_rate(baud_rate)?;
        Ok(self.reopen_serial(next, "baud rate").await)
    }

    /// Switches to another device and baud rate in a single close/open cycle.
    ///
    /// # Errors
    ///
    /// [`ConfigError::EmptyDevicePath`] or [`ConfigError::OutOfRange`].
    pub async fn set_device_and_baud_rate(
        &mut self,
        path: &str,
        baud_rate: u32,
    ) -> Result<Reconfigured, ConfigError> {
        if path == self.config.device_path() && baud_rate == self.config.baud_rate() {
            debug!("serial settings unchanged; nothing to do");
            return Ok(Reconfigured::Unchanged);
        }
        let next = self.config.with_device_and_baud_rate(path, baud_rate)?;
        Ok(self.reopen_serial(next, "serial device").await)
    }

    /// Closes the serial endpoint and leaves it closed until the next reopen.
    ///
    /// The broadcast server keeps running.
    pub async fn close_serial_port(&mut self) {
        if let Err(e) = self.stop_serial().await {
            error!("closing serial port: {e}");
        }
    }

    async fn reopen_serial(&mut self, next: BridgeConfig, what: &'static str) -> Reconfigured {
        self.begin(what);
        if let Err(e) = self.stop_serial().await {
            error!("closing serial port: {e}");
        }
        self.config = next;
        let up = self.start_serial().await;
        outcome(up)
    }

    fn begin(&self, what: &'static str) {
        info!("reconfiguring {what}");
        self.events
            .emit_status(StatusEvent::Reconfiguring { what });
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Status of the serial connection; `Disconnected` if none was opened.
    pub fn port_status(&self) -> PortStatus {
        self.serial
            .as_ref()
            .map_or(PortStatus::Disconnected, SerialEndpoint::status)
    }

    /// The devices present on the host.
    ///
    /// # Errors
    ///
    /// [`EnumerationError`] if the platform query fails.
    pub fn available_ports(&self) -> Result<Vec<PortDescriptor>, EnumerationError> {
        self.deps.enumerator.available_ports()
    }

    /// Where the broadcast server is listening, if it is up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(BroadcastServer::local_addr)
    }

    pub fn client_count(&self) -> usize {
        self.server
            .as_ref()
            .map_or(0, BroadcastServer::client_count)
    }

    /// Write handle for the current serial connection, if one is open.
    pub fn serial_handle(&self) -> Option<SerialHandle> {
        self.serial.as_ref().map(SerialEndpoint::handle)
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Closes the serial endpoint and stops the broadcast server.
    ///
    /// Both are attempted even if the first fails.
    ///
    /// # Errors
    ///
    /// [`TeardownError`] naming whichever side failed.
    pub async fn shutdown(mut self) -> Result<(), TeardownError> {
        info!("shutting down bridge");
        let serial = self.stop_serial().await.err();
        let server = self.stop_server().await.err();
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        self.events.emit_status(StatusEvent::BridgeStopped);
        TeardownError::check(serial, server)
    }

    // ── Leaves ────────────────────────────────────────────────────────────────

    async fn start_server(&mut self) -> bool {
        let addr = self.config.listen_addr();
        match BroadcastServer::listen(addr, self.inbound_tx.clone(), Arc::clone(&self.events))
            .await
        {
            Ok(server) => {
                self.server_slot.send_replace(Some(server.handle()));
                self.server = Some(server);
                true
            }
            Err(e) => {
                warn!("continuing without WebSocket server: {e}");
                false
            }
        }
    }

    async fn stop_server(&mut self) -> Result<(), CloseError> {
        self.server_slot.send_replace(None);
        match self.server.take() {
            Some(mut server) => server.stop().await,
            None => Ok(()),
        }
    }

    async fn start_serial(&mut self) -> bool {
        if !self.config.serial_enabled() {
            info!("serial side disabled");
            self.events.emit_status(StatusEvent::SerialDisabled);
            return true;
        }
        match SerialEndpoint::open(
            Arc::clone(&self.deps.opener),
            self.config.device_path(),
            self.config.baud_rate(),
            self.deps.open_timeout,
            self.lines_tx.clone(),
            Arc::clone(&self.events),
        )
        .await
        {
            Ok(endpoint) => {
                self.serial_slot.send_replace(Some(endpoint.handle()));
                self.serial = Some(endpoint);
                true
            }
            Err(e) => {
                warn!("continuing without serial port: {e}");
                false
            }
        }
    }

    async fn stop_serial(&mut self) -> Result<(), CloseError> {
        self.serial_slot.send_replace(None);
        match self.serial.take() {
            Some(mut endpoint) => endpoint.close().await,
            None => Ok(()),
        }
    }
}

impl Drop for BridgeController {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

impl std::fmt::Debug for BridgeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeController")
            .field("config", &self.config)
            .field("serial", &self.serial)
            .field("server", &self.server)
            .finish()
    }
}

fn outcome(up: bool) -> Reconfigured {
    if up {
        Reconfigured::Applied
    } else {
        Reconfigured::Degraded
    }
}

// ── Pumps ─────────────────────────────────────────────────────────────────────

async fn pump_lines(
    mut lines: mpsc::Receiver<String>,
    server: watch::Receiver<Option<BroadcastHandle>>,
    events: Arc<EventHub>,
) {
    while let Some(line) = lines.recv().await {
        events.emit_data(line.as_str());
        let handle = server.borrow().clone();
        match handle {
            Some(handle) => {
                let sent = handle.broadcast(&line);
                debug!("line broadcast to {sent} client(s)");
            }
            None => debug!("WebSocket server down; line not broadcast"),
        }
    }
}

async fn pump_inbound(
    mut inbound: mpsc::Receiver<InboundMessage>,
    serial: watch::Receiver<Option<SerialHandle>>,
) {
    while let Some(msg) = inbound.recv().await {
        let handle = serial.borrow().clone();
        let Some(handle) = handle else {
            warn!(
                "serial port not open; dropping message from client {}",
                msg.client
            );
            continue;
        };

        let InboundMessage { client, text } = msg;
        // Writes block on the link lock; keep them off the async workers and
        // in arrival order.
        let written = tokio::task::spawn_blocking(move || handle.write_line(text.as_bytes())).await;
        match written {
            Ok(Ok(())) => debug!("client {client} message written to serial"),
            Ok(Err(e)) => warn!("dropping message from client {client}: {e}"),
            Err(e) => error!("serial write task failed: {e}"),
        }
    }
}
