//! Serial device access.
//!
//! The bridge never talks to `serialport` directly.  It goes through two seams:
//!
//! - [`SerialOpener`] claims a device and hands back a byte stream
//!   ([`SerialLink`]).  [`SystemSerialOpener`] is the real implementation;
//!   [`mock::MockSerialOpener`] is an in-memory stand-in used by tests and by
//!   anyone who wants to drive the bridge without hardware.
//! - [`PortEnumerator`] lists the devices present on the host.
//!
//! [`SerialEndpoint`] owns one open connection: it runs the blocking read loop,
//! frames bytes into lines, and serialises writes.

pub mod endpoint;
pub mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{ErrorKind, SerialPortType};

use crate::domain::{EnumerationError, OpenError, PortDescriptor, PortKind};

pub use endpoint::{SerialEndpoint, SerialHandle};

/// Read timeout on the device.
///
/// The reader loop wakes at least this often to notice a close request.
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Default bound on how long opening a device may take.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// A claimed serial device as a blocking byte stream.
///
/// Reads must return within a bounded time (an `ErrorKind::TimedOut` error is
/// the normal "nothing arrived" result).
pub trait SerialLink: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> SerialLink for T {}

/// Claims serial devices.
///
/// `open` blocks; callers run it on the blocking thread pool.
pub trait SerialOpener: Send + Sync {
    /// Opens `path` at `baud_rate`, 8 data bits, no parity, 1 stop bit.
    fn open(&self, path: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>, OpenError>;
}

/// Lists the serial devices on the host.
#[cfg_attr(test, mockall::automock)]
pub trait PortEnumerator: Send + Sync {
    fn available_ports(&self) -> Result<Vec<PortDescriptor>, EnumerationError>;
}

// ── System implementations ────────────────────────────────────────────────────

/// Opens real devices through the `serialport` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSerialOpener;

impl SerialOpener for SystemSerialOpener {
    fn open(&self, path: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>, OpenError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(SERIAL_READ_TIMEOUT)
            .open()
            .map_err(|e| classify_open_error(path, e))?;
        Ok(Box::new(port))
    }
}

fn classify_open_error(path: &str, err: serialport::Error) -> OpenError {
    let path = path.to_string();
    match err.kind() {
        ErrorKind::NoDevice | ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            OpenError::NotFound { path }
        }
        ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => OpenError::PermissionDenied { path },
        // Exclusive-access failures only surface as EBUSY text.
        _ if err.description.to_lowercase().contains("busy") => OpenError::Busy { path },
        _ => OpenError::Io {
            path,
            message: err.description,
        },
    }
}

/// Enumerates devices through `serialport::available_ports`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortEnumerator;

impl PortEnumerator for SystemPortEnumerator {
    fn available_ports(&self) -> Result<Vec<PortDescriptor>, EnumerationError> {
        let ports =
            serialport::available_ports().map_err(|e| EnumerationError(e.description))?;
        Ok(ports
            .into_iter()
            .map(|p| describe_port(p.port_name, p.port_type))
            .collect())
    }
}

fn describe_port(path: String, port_type: SerialPortType) -> PortDescriptor {
    match port_type {
        SerialPortType::UsbPort(info) => PortDescriptor {
            path,
            kind: PortKind::Usb,
            manufacturer: info.manufacturer,
            product: info.product,
            serial_number: info.serial_number,
            vendor_id: Some(info.vid),
            product_id: Some(info.pid),
        },
        SerialPortType::BluetoothPort => PortDescriptor::bare(path, PortKind::Bluetooth),
        SerialPortType::PciPort => PortDescriptor::bare(path, PortKind::Pci),
        SerialPortType::Unknown => PortDescriptor::bare(path, PortKind::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usb_port_keeps_identity_fields() {
        // Arrange
        let info = serialport::UsbPortInfo {
            vid: 0x0403,
            pid: 0x6001,
            serial_number: Some("A50285BI".to_string()),
            manufacturer: Some("FTDI".to_string()),
            product: Some("FT232R USB UART".to_string()),
        };

        // Act
        let desc = describe_port("/dev/ttyUSB0".to_string(), SerialPortType::UsbPort(info));

        // Assert
        assert_eq!(desc.kind, PortKind::Usb);
        assert_eq!(desc.vendor_id, Some(0x0403));
        assert_eq!(desc.product_id, Some(0x6001));
        assert_eq!(desc.manufacturer.as_deref(), Some("FTDI"));
    }

    #[test]
    fn test_non_usb_ports_are_bare() {
        let desc = describe_port("COM1".to_string(), SerialPortType::PciPort);
        assert_eq!(desc, PortDescriptor::bare("COM1", PortKind::Pci));

        let desc = describe_port("/dev/rfcomm0".to_string(), SerialPortType::BluetoothPort);
        assert_eq!(desc.kind, PortKind::Bluetooth);
    }

    #[test]
    fn test_missing_device_is_not_found() {
        let err = serialport::Error::new(ErrorKind::NoDevice, "no such device");
        assert!(matches!(
            classify_open_error("/dev/ttyUSB9", err),
            OpenError::NotFound { .. }
        ));
    }

    #[test]
    fn test_permission_denied_is_classified() {
        let err = serialport::Error::new(
            ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
            "Permission denied",
        );
        assert!(matches!(
            classify_open_error("/dev/ttyS0", err),
            OpenError::PermissionDenied { .. }
        ));
    }

    #[test]
    fn test_busy_device_is_classified() {
        let err = serialport::Error::new(
            ErrorKind::Io(std::io::ErrorKind::Other),
            "Device or resource busy",
        );
        assert!(matches!(
            classify_open_error("/dev/ttyUSB0", err),
            OpenError::Busy { .. }
        ));
    }

    #[test]
    fn test_mocked_enumerator_returns_configured_ports() {
        let mut enumerator = MockPortEnumerator::new();
        enumerator
            .expect_available_ports()
            .returning(|| Ok(vec![PortDescriptor::bare("COM3", PortKind::Unknown)]));

        let ports = enumerator.available_ports().unwrap();

        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].path, "COM3");
    }
}
