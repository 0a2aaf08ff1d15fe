//! rs232ws-bridge library crate.
//!
//! Bridges one serial device to any number of WebSocket clients: every line
//! the device sends is broadcast to all clients, and every message a client
//! sends is written to the device followed by `\n`.
//!
//! # Architecture
//!
//! ```text
//! serial device (newline-terminated text)
//!         ↕
//! [rs232ws-bridge]
//!   ├── domain/           Error taxonomy; config and event types from rs232ws-core
//!   ├── application/
//!   │     ├── controller  Owns both leaves, moves lines, single-setting changes
//!   │     └── service     Owns the controller, full teardown-and-rebuild
//!   └── infrastructure/
//!         ├── serial/     Serial endpoint (serialport), port enumeration, mock
//!         ├── ws_server/  WebSocket accept loop and broadcast (tokio-tungstenite)
//!         └── settings_file/ TOML settings on disk
//!         ↕
//! WebSocket clients (text frames)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` sequences leaf lifecycles; it never touches sockets or
//!   devices directly.
//! - `infrastructure` owns every socket, device handle, and file.

/// Domain layer: error taxonomy and shared types.
pub mod domain;

/// Application layer: controller and service.
pub mod application;

/// Infrastructure layer: serial devices, WebSocket server, settings file.
pub mod infrastructure;
