//! # rs232ws-core
//!
//! Shared library for the RS232WS bridge containing the validated bridge
//! configuration, the newline line buffer, the typed event registry, and the
//! serial port descriptor types.
//!
//! This crate has zero dependencies on OS APIs, async runtimes, or sockets.
//! Everything here can be unit tested without a serial device or a network.
//!
//! # Architecture overview
//!
//! The bridge moves text lines between one serial device and any number of
//! WebSocket clients.  This crate defines the vocabulary both sides share:
//!
//! - **`domain`** – The `BridgeConfig` snapshot (and the raw settings it is
//!   parsed from), the `data`/`status` events raised to observers, and the
//!   `EventHub` registry that dispatches them.
//!
//! - **`protocol`** – How bytes from the serial line become lines.  The
//!   `LineBuffer` accumulates bytes until a `\n` terminator is seen.

pub mod domain;
pub mod protocol;

pub use domain::config::{BridgeConfig, ConfigError, RawNumber, RawSettings};
pub use domain::events::{
    BridgeEvent, EventHub, EventKind, StatusEvent, SubscriptionId,
};
pub use domain::ports::{PortDescriptor, PortKind, PortStatus};
pub use protocol::lines::LineBuffer;
