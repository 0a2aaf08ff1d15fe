//! One open serial connection.
//!
//! # Threading
//!
//! Device reads block, so the read loop runs on Tokio's blocking pool via
//! `spawn_blocking`.  The link sits behind a `std::sync::Mutex` shared with
//! [`SerialHandle`]s; a read holds the lock for at most
//! [`SERIAL_READ_TIMEOUT`](super::SERIAL_READ_TIMEOUT), so writes interleave
//! with reads at that granularity.
//!
//! # Lifecycle
//!
//! `Opening → Open → Closing → Closed`.  A read or device error moves straight
//! to `Closed`.  Once closed, the link is dropped: the device is released and
//! every outstanding handle fails with [`WriteError::NotOpen`].

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use rs232ws_core::protocol::{LineBuffer, LINE_TERMINATOR};

use super::{SerialLink, SerialOpener};
use crate::domain::{CloseError, EventHub, OpenError, PortStatus, StatusEvent, WriteError};

const READ_CHUNK: usize = 1024;

struct Shared {
    path: String,
    link: Mutex<Option<Box<dyn SerialLink>>>,
    status: Mutex<PortStatus>,
    stop: AtomicBool,
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, Option<Box<dyn SerialLink>>> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn status(&self) -> PortStatus {
        *self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_status(&self, status: PortStatus) {
        *self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
    }

    /// Drops the link, releasing the device.
    fn release(&self) {
        drop(self.link().take());
    }
}

/// Owner of an open serial connection.
pub struct SerialEndpoint {
    shared: Arc<Shared>,
    baud_rate: u32,
    reader: Option<JoinHandle<()>>,
    events: Arc<EventHub>,
}

impl SerialEndpoint {
    /// Claims `path` and starts the read loop.
    ///
    /// Every complete line read from the device is sent on `lines`, without
    /// its terminator.  Status transitions are raised on `events`.
    ///
    /// # Errors
    ///
    /// Returns the [`OpenError`] reported by `opener`, or
    /// [`OpenError::Timeout`] if claiming the device takes longer than
    /// `open_timeout`.  A `SerialError` status is raised in both cases.
    pub async fn open(
        opener: Arc<dyn SerialOpener>,
        path: &str,
        baud_rate: u32,
        open_timeout: Duration,
        lines: mpsc::Sender<String>,
        events: Arc<EventHub>,
    ) -> Result<Self, OpenError> {
        events.emit_status(StatusEvent::SerialOpening {
            path: path.to_string(),
            baud_rate,
        });

        let link = match claim(opener, path, baud_rate, open_timeout).await {
            Ok(link) => link,
            Err(e) => {
                warn!("failed to open serial port {path}: {e}");
                events.emit_status(StatusEvent::SerialError {
                    path: path.to_string(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let shared = Arc::new(Shared {
            path: path.to_string(),
            link: Mutex::new(Some(link)),
            status: Mutex::new(PortStatus::Open),
            stop: AtomicBool::new(false),
        });

        let reader = {
            let shared = Arc::clone(&shared);
            let events = Arc::clone(&events);
            tokio::task::spawn_blocking(move || read_loop(shared, lines, events))
        };

        info!("serial port {path} open at {baud_rate} baud");
        events.emit_status(StatusEvent::SerialOpen {
            path: path.to_string(),
            baud_rate,
        });

        Ok(Self {
            shared,
            baud_rate,
            reader: Some(reader),
            events,
        })
    }

    pub fn path(&self) -> &str {
        &self.shared.path
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn status(&self) -> PortStatus {
        self.shared.status()
    }

    /// A cloneable write handle bound to this connection.
    pub fn handle(&self) -> SerialHandle {
        SerialHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stops the read loop and releases the device.
    ///
    /// Returns only once the device is released, so the same path can be
    /// reopened immediately.  Calling `close` again is a no-op.
    ///
    /// # Errors
    ///
    /// [`CloseError::ReaderPanicked`] if the read loop panicked.  The device is
    /// released regardless.
    pub async fn close(&mut self) -> Result<(), CloseError> {
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };
        let path = self.shared.path.clone();

        self.shared.set_status(PortStatus::Closing);
        self.events
            .emit_status(StatusEvent::SerialClosing { path: path.clone() });

        self.shared.stop.store(true, Ordering::Release);
        let joined = reader.await;
        self.shared.release();
        self.shared.set_status(PortStatus::Closed);

        info!("serial port {path} closed");
        self.events.emit_status(StatusEvent::SerialClosed { path });

        joined.map_err(|e| CloseError::ReaderPanicked(e.to_string()))
    }
}

impl Drop for SerialEndpoint {
    fn drop(&mut self) {
        // The read loop releases the device on its way out.
        self.shared.stop.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for SerialEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialEndpoint")
            .field("path", &self.shared.path)
            .field("baud_rate", &self.baud_rate)
            .field("status", &self.shared.status())
            .finish()
    }
}

/// Write access to one specific connection.
///
/// A handle never follows a reopen: once its connection is closed, every
/// write fails with [`WriteError::NotOpen`].
#[derive(Clone)]
pub struct SerialHandle {
    shared: Arc<Shared>,
}

impl SerialHandle {
    /// Writes `payload` followed by `\n` and flushes.
    ///
    /// Blocks while a read is in progress; call from a blocking context.
    pub fn write_line(&self, payload: &[u8]) -> Result<(), WriteError> {
        if self.shared.status() != PortStatus::Open {
            return Err(WriteError::NotOpen);
        }
        let mut guard = self.shared.link();
        let link = guard.as_mut().ok_or(WriteError::NotOpen)?;

        let mut framed = Vec::with_capacity(payload.len() + 1);
        framed.extend_from_slice(payload);
        framed.push(LINE_TERMINATOR);
        link.write_all(&framed)?;
        link.flush()?;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.shared.status().is_open()
    }

    pub fn path(&self) -> &str {
        &self.shared.path
    }
}

impl std::fmt::Debug for SerialHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialHandle")
            .field("path", &self.shared.path)
            .finish()
    }
}

// ── Blocking helpers ──────────────────────────────────────────────────────────

async fn claim(
    opener: Arc<dyn SerialOpener>,
    path: &str,
    baud_rate: u32,
    open_timeout: Duration,
) -> Result<Box<dyn SerialLink>, OpenError> {
    let owned_path = path.to_string();
    let task = tokio::task::spawn_blocking(move || opener.open(&owned_path, baud_rate));

    // On timeout the blocking open keeps running; if it eventually succeeds the
    // link is dropped with the task's output.
    match timeout(open_timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(OpenError::Io {
            path: path.to_string(),
            message: format!("open task failed: {join}"),
        }),
        Err(_) => Err(OpenError::Timeout {
            path: path.to_string(),
            timeout: open_timeout,
        }),
    }
}

fn read_loop(shared: Arc<Shared>, lines: mpsc::Sender<String>, events: Arc<EventHub>) {
    let mut framer = LineBuffer::new();
    let mut buf = [0u8; READ_CHUNK];

    while !shared.stop.load(Ordering::Acquire) {
        let result = {
            let mut guard = shared.link();
            match guard.as_mut() {
                Some(link) => link.read(&mut buf),
                None => break,
            }
        };

        match result {
            Ok(0) => {
                fail(&shared, &events, "device reported end of stream");
                return;
            }
            Ok(n) => {
                for line in framer.push(&buf[..n]) {
                    debug!("serial {} → {line:?}", shared.path);
                    if lines.blocking_send(line).is_err() {
                        debug!("line consumer gone; stopping reader for {}", shared.path);
                        shared.release();
                        return;
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                fail(&shared, &events, &e.to_string());
                return;
            }
        }
    }

    shared.release();
}

fn fail(shared: &Shared, events: &EventHub, message: &str) {
    warn!("serial port {} failed: {message}", shared.path);
    shared.release();
    shared.set_status(PortStatus::Closed);
    events.emit_status(StatusEvent::SerialError {
        path: shared.path.clone(),
        message: message.to_string(),
    });
}
