//! Application layer for rs232ws-bridge.
//!
//! Decides *when* leaves are opened, closed, and rebuilt; the infrastructure
//! layer decides *how*.
//!
//! - [`BridgeController`] owns one serial endpoint and one broadcast server and
//!   applies single-setting changes to them.
//! - [`BridgeService`] owns the controller itself and replaces it wholesale on
//!   a full settings update.

pub mod controller;
pub mod service;

pub use controller::{BridgeController, BridgeDeps, Reconfigured};
pub use service::{BridgeService, RebuildPolicy, ServiceError};
