//! Error taxonomy for the bridge components.
//!
//! Each leaf reports its own failure type.  None of these escape the
//! [`BridgeController`](crate::application::BridgeController): it converts them
//! into `status` events and keeps running with the failed side absent.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// The serial device could not be claimed.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("serial device {path} not found")]
    NotFound { path: String },

    #[error("permission denied opening {path}")]
    PermissionDenied { path: String },

    #[error("serial device {path} is busy")]
    Busy { path: String },

    #[error("timed out after {timeout:?} opening {path}")]
    Timeout { path: String, timeout: Duration },

    #[error("failed to open {path}: {message}")]
    Io { path: String, message: String },
}

/// A line could not be written to the serial device.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The connection is closed, closing, or was never opened.
    #[error("serial port is not open")]
    NotOpen,

    #[error("serial write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The WebSocket listener could not be bound.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("address {addr} is already in use")]
    AddrInUse { addr: SocketAddr },

    #[error("failed to bind {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl BindError {
    pub(crate) fn from_io(addr: SocketAddr, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::AddrInUse {
            BindError::AddrInUse { addr }
        } else {
            BindError::Io { addr, source }
        }
    }
}

/// Tearing down a leaf failed.
#[derive(Debug, Error)]
pub enum CloseError {
    #[error("serial reader task failed: {0}")]
    ReaderPanicked(String),

    #[error("WebSocket accept loop failed: {0}")]
    AcceptLoopPanicked(String),
}

/// Both leaves are always torn down; this collects whichever of them failed.
#[derive(Debug)]
pub struct TeardownError {
    pub serial: Option<CloseError>,
    pub server: Option<CloseError>,
}

impl TeardownError {
    /// `Ok(())` when neither side failed.
    pub fn check(serial: Option<CloseError>, server: Option<CloseError>) -> Result<(), Self> {
        if serial.is_none() && server.is_none() {
            Ok(())
        } else {
            Err(Self { serial, server })
        }
    }
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("bridge teardown failed")?;
        if let Some(e) = &self.serial {
            write!(f, "; serial: {e}")?;
        }
        if let Some(e) = &self.server {
            write!(f, "; server: {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}

/// The host's serial port list could not be read.
#[derive(Debug, Error)]
#[error("failed to enumerate serial ports: {0}")]
pub struct EnumerationError(pub String);
