//! Infrastructure layer: serial devices, the WebSocket server, settings files.

pub mod serial;
pub mod settings_file;
pub mod ws_server;

pub use serial::{
    PortEnumerator, SerialEndpoint, SerialHandle, SerialLink, SerialOpener, SystemPortEnumerator,
    SystemSerialOpener,
};
pub use ws_server::{BroadcastHandle, BroadcastServer, InboundMessage};
