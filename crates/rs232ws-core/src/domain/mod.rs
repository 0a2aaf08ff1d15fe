//! Domain layer: pure bridge types with no I/O.
//!
//! - [`config`] – the validated [`BridgeConfig`](config::BridgeConfig) snapshot
//!   and the loosely typed [`RawSettings`](config::RawSettings) it is parsed from.
//! - [`events`] – `data`/`status` events and the [`EventHub`](events::EventHub)
//!   observer registry.
//! - [`ports`] – serial port descriptors and connection status.

pub mod config;
pub mod events;
pub mod ports;
