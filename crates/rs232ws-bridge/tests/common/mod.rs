//! Shared helpers for the bridge integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use rs232ws_bridge::application::BridgeDeps;
use rs232ws_bridge::domain::{
    BridgeConfig, BridgeEvent, EnumerationError, EventHub, EventKind, PortDescriptor, PortKind,
    StatusEvent,
};
use rs232ws_bridge::infrastructure::serial::mock::MockSerialOpener;
use rs232ws_bridge::infrastructure::PortEnumerator;

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A port nothing is listening on at the time of the call.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn loopback_config(device: &str, port: u16, serial_enabled: bool) -> BridgeConfig {
    BridgeConfig::new(device, 9600, port, serial_enabled)
        .unwrap()
        .with_bind_address("127.0.0.1".parse().unwrap())
}

/// Always reports the same two ports.
pub struct FixedPorts;

impl PortEnumerator for FixedPorts {
    fn available_ports(&self) -> Result<Vec<PortDescriptor>, EnumerationError> {
        Ok(vec![
            PortDescriptor::bare("COM1", PortKind::Pci),
            PortDescriptor::bare("COM3", PortKind::Usb),
        ])
    }
}

pub fn mock_deps(mock: &MockSerialOpener) -> BridgeDeps {
    BridgeDeps {
        opener: Arc::new(mock.clone()),
        enumerator: Arc::new(FixedPorts),
        open_timeout: Duration::from_secs(1),
    }
}

/// Records every event raised on a hub.
#[derive(Clone, Default)]
pub struct Recorder {
    pub data: Arc<Mutex<Vec<String>>>,
    pub status: Arc<Mutex<Vec<StatusEvent>>>,
}

impl Recorder {
    pub fn attach(hub: &EventHub) -> Self {
        let rec = Self::default();
        let data = Arc::clone(&rec.data);
        hub.subscribe(EventKind::Data, move |e| {
            if let BridgeEvent::Data(line) = e {
                data.lock().unwrap().push(line.clone());
            }
        });
        let status = Arc::clone(&rec.status);
        hub.subscribe(EventKind::Status, move |e| {
            if let BridgeEvent::Status(s) = e {
                status.lock().unwrap().push(s.clone());
            }
        });
        rec
    }

    pub fn data(&self) -> Vec<String> {
        self.data.lock().unwrap().clone()
    }

    pub fn status(&self) -> Vec<StatusEvent> {
        self.status.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.data.lock().unwrap().clear();
        self.status.lock().unwrap().clear();
    }
}

/// Polls `cond` every 5 ms for up to 2 s.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

pub async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    ws
}

/// The next text frame, or `None` if nothing arrives within `wait`.
pub async fn next_text(client: &mut Client, wait: Duration) -> Option<String> {
    loop {
        match tokio::time::timeout(wait, client.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return Some(text),
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}
