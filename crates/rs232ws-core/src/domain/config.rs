//! Bridge configuration types.
//!
//! Settings arrive from the outside world loosely typed: the settings form and
//! the original settings store keep numbers as strings (`"9600"`), config files
//! may hold real integers, and field names differ between sources.
//! [`RawSettings`] accepts all of those shapes.  [`RawSettings::validate`] is
//! the single parsing step that turns them into a [`BridgeConfig`]; nothing past
//! that point ever sees an unparsed string.
//!
//! [`BridgeConfig`] is an immutable snapshot.  A reconfiguration produces a new
//! snapshot (see [`BridgeConfig::with_listen_port`] and friends) which replaces
//! the old one wholesale.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Baud rate used when none is configured.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// WebSocket listen port used when none is configured.
pub const DEFAULT_LISTEN_PORT: u16 = 58081;

/// Errors raised while validating configuration input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric field held text that is not an integer.
    #[error("{field} must be an integer, got '{value}'")]
    NotNumeric { field: &'static str, value: String },

    /// A numeric field was outside its allowed range.
    #[error("{field} must be in {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        expected: &'static str,
    },

    /// The serial port is enabled but no device path was given.
    #[error("device path must not be empty while the serial port is enabled")]
    EmptyDevicePath,

    /// The bind address is not an IP address.
    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),
}

// ── Validated snapshot ────────────────────────────────────────────────────────

/// Validated runtime configuration for one bridge instance.
///
/// Fields are private so every `BridgeConfig` in the program has passed
/// validation: the baud rate is non-zero, the listen port is in `1..=65535`, and
/// the device path is non-empty whenever the serial side is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    device_path: String,
    baud_rate: u32,
    listen_port: u16,
    serial_enabled: bool,
    bind_address: IpAddr,
}

impl BridgeConfig {
    /// Builds a configuration bound to all interfaces (`0.0.0.0`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the baud rate is zero, the port is zero, or the
    /// device path is blank while `serial_enabled` is set.
    pub fn new(
        device_path: impl Into<String>,
        baud_rate: u32,
        listen_port: u16,
        serial_enabled: bool,
    ) -> Result<Self, ConfigError> {
        let cfg = Self {
            device_path: device_path.into(),
            baud_rate,
            listen_port,
            serial_enabled,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        cfg.check()?;
        Ok(cfg)
    }

    /// Returns a copy bound to `addr` instead of all interfaces.
    pub fn with_bind_address(mut self, addr: IpAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Returns a copy listening on `port`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for port `0`.
    pub fn with_listen_port(&self, port: u16) -> Result<Self, ConfigError> {
        let mut next = self.clone();
        next.listen_port = port;
        next.check()?;
        Ok(next)
    }

    /// Returns a copy using `baud_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for a zero baud rate.
    pub fn with_baud_rate(&self, baud_rate: u32) -> Result<Self, ConfigError> {
        let mut next = self.clone();
        next.baud_rate = baud_rate;
        next.check()?;
        Ok(next)
    }

    /// Returns a copy using both `device_path` and `baud_rate`.
    ///
    /// # Errors
    ///
    /// Same conditions as [`BridgeConfig::new`].
    pub fn with_device_and_baud_rate(
        &self,
        device_path: impl Into<String>,
        baud_rate: u32,
    ) -> Result<Self, ConfigError> {
        let mut next = self.clone();
        next.device_path = device_path.into();
        next.baud_rate = baud_rate;
        next.check()?;
        Ok(next)
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn serial_enabled(&self) -> bool {
        self.serial_enabled
    }

    pub fn bind_address(&self) -> IpAddr {
        self.bind_address
    }

    /// The socket address the WebSocket server binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.listen_port)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::OutOfRange {
                field: "baud_rate",
                value: 0,
                expected: "1..=4294967295",
            });
        }
        if self.listen_port == 0 {
            return Err(ConfigError::OutOfRange {
                field: "listen_port",
                value: 0,
                expected: "1..=65535",
            });
        }
        if self.serial_enabled && self.device_path.trim().is_empty() {
            return Err(ConfigError::EmptyDevicePath);
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    /// `COM1`/`/dev/ttyUSB0` at 9600 baud, WebSocket on `0.0.0.0:58081`.
    fn default() -> Self {
        Self {
            device_path: default_device_path(),
            baud_rate: DEFAULT_BAUD_RATE,
            listen_port: DEFAULT_LISTEN_PORT,
            serial_enabled: true,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

impl fmt::Display for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.serial_enabled {
            write!(
                f,
                "{} @ {} baud <-> ws://{}",
                self.device_path,
                self.baud_rate,
                self.listen_addr()
            )
        } else {
            write!(f, "serial disabled <-> ws://{}", self.listen_addr())
        }
    }
}

/// Platform default serial device.
pub fn default_device_path() -> String {
    if cfg!(windows) {
        "COM1".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}

// ── Raw input ─────────────────────────────────────────────────────────────────

/// A numeric setting that may arrive as an integer or as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawNumber {
    Int(i64),
    Text(String),
}

impl RawNumber {
    fn parse(&self, field: &'static str) -> Result<i64, ConfigError> {
        match self {
            RawNumber::Int(n) => Ok(*n),
            RawNumber::Text(s) => s.trim().parse().map_err(|_| ConfigError::NotNumeric {
                field,
                value: s.clone(),
            }),
        }
    }
}

impl From<i64> for RawNumber {
    fn from(n: i64) -> Self {
        RawNumber::Int(n)
    }
}

impl From<&str> for RawNumber {
    fn from(s: &str) -> Self {
        RawNumber::Text(s.to_string())
    }
}

/// Settings as supplied by an external collaborator, before validation.
///
/// Accepts both the snake_case keys used in config files and the keys of the
/// original settings store (`port`, `baudRate`, `wsPort`, `usePort`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSettings {
    #[serde(default = "default_device_path", alias = "devicePath", alias = "port")]
    pub device_path: String,

    #[serde(default = "default_raw_baud_rate", alias = "baudRate")]
    pub baud_rate: RawNumber,

    #[serde(default = "default_raw_listen_port", alias = "listenPort", alias = "wsPort")]
    pub listen_port: RawNumber,

    #[serde(default = "default_true", alias = "serialEnabled", alias = "usePort")]
    pub serial_enabled: bool,

    #[serde(default, alias = "bindAddress", skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
}

fn default_raw_baud_rate() -> RawNumber {
    RawNumber::Int(i64::from(DEFAULT_BAUD_RATE))
}

fn default_raw_listen_port() -> RawNumber {
    RawNumber::Int(i64::from(DEFAULT_LISTEN_PORT))
}

fn default_true() -> bool {
    true
}

impl Default for RawSettings {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

impl RawSettings {
    /// Parses and validates into a [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NotNumeric`] if a numeric field holds non-integer text.
    /// - [`ConfigError::OutOfRange`] if the baud rate is not in `1..=u32::MAX`
    ///   or the port is not in `1..=65535`.
    /// - [`ConfigError::EmptyDevicePath`] if the serial side is enabled without a
    ///   device.
    /// - [`ConfigError::InvalidBindAddress`] if `bind_address` is not an IP.
    pub fn validate(&self) -> Result<BridgeConfig, ConfigError> {
        let baud = self.baud_rate.parse("baud_rate")?;
        let baud_rate = u32::try_from(baud)
            .ok()
            .filter(|b| *b > 0)
            .ok_or(ConfigError::OutOfRange {
                field: "baud_rate",
                value: baud,
                expected: "1..=4294967295",
            })?;

        let port = self.listen_port.parse("listen_port")?;
        let listen_port = u16::try_from(port)
            .ok()
            .filter(|p| *p > 0)
            .ok_or(ConfigError::OutOfRange {
                field: "listen_port",
                value: port,
                expected: "1..=65535",
            })?;

        let mut cfg = BridgeConfig::new(
            self.device_path.trim(),
            baud_rate,
            listen_port,
            self.serial_enabled,
        )?;

        if let Some(raw) = &self.bind_address {
            let addr: IpAddr = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidBindAddress(raw.clone()))?;
            cfg = cfg.with_bind_address(addr);
        }

        Ok(cfg)
    }
}

impl TryFrom<RawSettings> for BridgeConfig {
    type Error = ConfigError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        raw.validate()
    }
}

impl From<&BridgeConfig> for RawSettings {
    fn from(cfg: &BridgeConfig) -> Self {
        Self {
            device_path: cfg.device_path.clone(),
            baud_rate: RawNumber::Int(i64::from(cfg.baud_rate)),
            listen_port: RawNumber::Int(i64::from(cfg.listen_port)),
            serial_enabled: cfg.serial_enabled,
            bind_address: Some(cfg.bind_address.to_string()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(device: &str, baud: RawNumber, port: RawNumber) -> RawSettings {
        RawSettings {
            device_path: device.to_string(),
            baud_rate: baud,
            listen_port: port,
            serial_enabled: true,
            bind_address: None,
        }
    }

    #[test]
    fn test_default_config_matches_original_settings_schema() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.baud_rate(), 9600);
        assert_eq!(cfg.listen_port(), 58081);
        assert!(cfg.serial_enabled());
        assert_eq!(cfg.listen_addr().to_string(), "0.0.0.0:58081");
    }

    #[test]
    fn test_string_numbers_are_parsed() {
        // Arrange: the settings form stores every number as a string
        let settings = raw("COM5", "115200".into(), " 58082 ".into());

        // Act
        let cfg = settings.validate().unwrap();

        // Assert
        assert_eq!(cfg.device_path(), "COM5");
        assert_eq!(cfg.baud_rate(), 115_200);
        assert_eq!(cfg.listen_port(), 58082);
    }

    #[test]
    fn test_integer_numbers_are_accepted() {
        let cfg = raw("/dev/ttyS0", 9600.into(), 8080.into()).validate().unwrap();
        assert_eq!(cfg.baud_rate(), 9600);
        assert_eq!(cfg.listen_port(), 8080);
    }

    #[test]
    fn test_non_numeric_baud_rate_is_rejected() {
        let err = raw("COM1", "fast".into(), 58081.into()).validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::NotNumeric {
                field: "baud_rate",
                value: "fast".to_string()
            }
        );
    }

    #[test]
    fn test_trailing_garbage_is_rejected() {
        // Unlike a lenient prefix parse, "9600abc" is not a number.
        let err = raw("COM1", "9600abc".into(), 58081.into()).validate().unwrap_err();
        assert!(matches!(err, ConfigError::NotNumeric { field: "baud_rate", .. }));
    }

    #[test]
    fn test_zero_baud_rate_is_out_of_range() {
        let err = raw("COM1", 0.into(), 58081.into()).validate().unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "baud_rate", value: 0, .. }));
    }

    #[test]
    fn test_port_above_65535_is_out_of_range() {
        let err = raw("COM1", 9600.into(), "70000".into()).validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange { field: "listen_port", value: 70000, .. }
        ));
    }

    #[test]
    fn test_port_zero_is_out_of_range() {
        let err = raw("COM1", 9600.into(), 0.into()).validate().unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "listen_port", .. }));
    }

    #[test]
    fn test_negative_port_is_out_of_range() {
        let err = raw("COM1", 9600.into(), (-1).into()).validate().unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { value: -1, .. }));
    }

    #[test]
    fn test_empty_device_rejected_only_when_serial_enabled() {
        let mut settings = raw("  ", 9600.into(), 58081.into());
        assert_eq!(settings.validate().unwrap_err(), ConfigError::EmptyDevicePath);

        settings.serial_enabled = false;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_bind_address_is_parsed() {
        let mut settings = raw("COM1", 9600.into(), 58081.into());
        settings.bind_address = Some("127.0.0.1".to_string());
        let cfg = settings.validate().unwrap();
        assert_eq!(cfg.listen_addr().to_string(), "127.0.0.1:58081");
    }

    #[test]
    fn test_invalid_bind_address_is_rejected() {
        let mut settings = raw("COM1", 9600.into(), 58081.into());
        settings.bind_address = Some("localhost:1".to_string());
        assert_eq!(
            settings.validate().unwrap_err(),
            ConfigError::InvalidBindAddress("localhost:1".to_string())
        );
    }

    #[test]
    fn test_original_store_keys_are_accepted() {
        // Arrange: the JSON shape written by the original settings store
        let json = r#"{"port":"COM3","baudRate":"19200","wsPort":"58090","usePort":false}"#;

        // Act
        let settings: RawSettings = serde_json::from_str(json).unwrap();
        let cfg = settings.validate().unwrap();

        // Assert
        assert_eq!(cfg.device_path(), "COM3");
        assert_eq!(cfg.baud_rate(), 19200);
        assert_eq!(cfg.listen_port(), 58090);
        assert!(!cfg.serial_enabled());
    }

    #[test]
    fn test_toml_with_missing_fields_uses_defaults() {
        let settings: RawSettings = toml::from_str("listen_port = 9000\n").unwrap();
        let cfg = settings.validate().unwrap();
        assert_eq!(cfg.listen_port(), 9000);
        assert_eq!(cfg.baud_rate(), DEFAULT_BAUD_RATE);
        assert!(cfg.serial_enabled());
    }

    #[test]
    fn test_raw_settings_from_config_validates_back_to_same_config() {
        let cfg = BridgeConfig::new("/dev/ttyACM0", 57600, 9001, true).unwrap();
        let back = RawSettings::from(&cfg).validate().unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn test_with_listen_port_returns_new_snapshot() {
        let cfg = BridgeConfig::default();
        let next = cfg.with_listen_port(9000).unwrap();
        assert_eq!(cfg.listen_port(), DEFAULT_LISTEN_PORT);
        assert_eq!(next.listen_port(), 9000);
        assert!(cfg.with_listen_port(0).is_err());
    }

    #[test]
    fn test_with_device_and_baud_rate_updates_both_fields() {
        let cfg = BridgeConfig::default()
            .with_device_and_baud_rate("/dev/ttyUSB1", 38400)
            .unwrap();
        assert_eq!(cfg.device_path(), "/dev/ttyUSB1");
        assert_eq!(cfg.baud_rate(), 38400);
        assert!(cfg.with_baud_rate(0).is_err());
    }

    #[test]
    fn test_display_mentions_serial_state() {
        let on = BridgeConfig::new("COM2", 9600, 58081, true).unwrap();
        assert_eq!(on.to_string(), "COM2 @ 9600 baud <-> ws://0.0.0.0:58081");

        let off = BridgeConfig::new("", 9600, 58081, false).unwrap();
        assert_eq!(off.to_string(), "serial disabled <-> ws://0.0.0.0:58081");
    }
}
