//! Serial port descriptors and connection status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a serial device is attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Usb,
    Bluetooth,
    Pci,
    Unknown,
}

/// One serial device reported by the host platform.
///
/// This is a pass-through of what the platform enumeration reports; optional
/// fields are `None` when the platform does not provide them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDescriptor {
    pub path: String,
    pub kind: PortKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u16>,
}

impl PortDescriptor {
    /// A descriptor carrying only a path, as reported for non-USB devices.
    pub fn bare(path: impl Into<String>, kind: PortKind) -> Self {
        Self {
            path: path.into(),
            kind,
            manufacturer: None,
            product: None,
            serial_number: None,
            vendor_id: None,
            product_id: None,
        }
    }
}

/// Lifecycle state of the serial connection as seen by callers.
///
/// `Disconnected` is reported when there is no bridge or no serial endpoint at
/// all; `Closed` means an endpoint exists but its connection has been closed
/// (explicitly or after an I/O error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortStatus {
    #[default]
    Disconnected,
    Opening,
    Open,
    Closing,
    Closed,
}

impl PortStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PortStatus::Disconnected => "disconnected",
            PortStatus::Opening => "opening",
            PortStatus::Open => "open",
            PortStatus::Closing => "closing",
            PortStatus::Closed => "closed",
        }
    }

    /// `true` only while data can flow.
    pub fn is_open(self) -> bool {
        self == PortStatus::Open
    }
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_disconnected() {
        assert_eq!(PortStatus::default(), PortStatus::Disconnected);
        assert_eq!(PortStatus::default().to_string(), "disconnected");
    }

    #[test]
    fn test_only_open_is_open() {
        assert!(PortStatus::Open.is_open());
        assert!(!PortStatus::Opening.is_open());
        assert!(!PortStatus::Closed.is_open());
    }

    #[test]
    fn test_descriptor_serializes_camel_case_and_skips_missing_fields() {
        // Arrange
        let mut port = PortDescriptor::bare("/dev/ttyUSB0", PortKind::Usb);
        port.vendor_id = Some(0x0403);

        // Act
        let json = serde_json::to_string(&port).unwrap();

        // Assert
        assert_eq!(json, r#"{"path":"/dev/ttyUSB0","kind":"usb","vendorId":1027}"#);
    }
}
