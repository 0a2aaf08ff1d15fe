//! Domain layer for rs232ws-bridge.
//!
//! The pure configuration, event, and framing types live in `rs232ws-core`
//! and are re-exported here so the rest of the crate can write
//! `domain::BridgeConfig`.  This module adds the error taxonomy of the bridge
//! components.

pub mod errors;

pub use errors::{BindError, CloseError, EnumerationError, OpenError, TeardownError, WriteError};
pub use rs232ws_core::{
    BridgeConfig, BridgeEvent, ConfigError, EventHub, EventKind, PortDescriptor, PortKind,
    PortStatus, RawNumber, RawSettings, StatusEvent, SubscriptionId,
};
