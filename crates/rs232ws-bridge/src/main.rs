//! RS232WS bridge entry point.
//!
//! Opens one serial device and a WebSocket server.  Every line the device
//! sends is broadcast to all connected clients; every message a client sends
//! is written to the device followed by `\n`.
//!
//! # Usage
//!
//! ```text
//! rs232ws-bridge [OPTIONS]
//!
//! Options:
//!   --config <PATH>      Settings file [default: platform config dir]
//!   --device <PATH>      Serial device, e.g. COM3 or /dev/ttyUSB0
//!   --baud <RATE>        Baud rate [default: 9600]
//!   --port <PORT>        WebSocket listen port [default: 58081]
//!   --bind <ADDR>        WebSocket bind address [default: 0.0.0.0]
//!   --no-serial          Run the WebSocket side only
//!   --list-ports         Print the host's serial ports as JSON and exit
//!   --save-config        Write the merged settings back to the settings file
//! ```
//!
//! # Settings precedence
//!
//! Command-line flags, then environment variables, then the settings file,
//! then built-in defaults.
//!
//! | Variable              | Flag          |
//! |-----------------------|---------------|
//! | `RS232WS_CONFIG`      | `--config`    |
//! | `RS232WS_DEVICE`      | `--device`    |
//! | `RS232WS_BAUD`        | `--baud`      |
//! | `RS232WS_PORT`        | `--port`      |
//! | `RS232WS_BIND`        | `--bind`      |
//! | `RS232WS_NO_SERIAL`   | `--no-serial` |
//!
//! # Signals
//!
//! - Ctrl+C: close the device and the server, then exit.
//! - SIGHUP (Unix): re-read the settings and rebuild the bridge from them.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rs232ws_bridge::application::{BridgeDeps, BridgeService, RebuildPolicy};
use rs232ws_bridge::domain::{BridgeEvent, EventKind, RawNumber, RawSettings};
use rs232ws_bridge::infrastructure::settings_file::{
    default_settings_path, load_settings, save_settings,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Serial-port-to-WebSocket bridge.
///
/// Numeric flags are taken as text and validated together with the settings
/// file, so `--baud fast` is reported the same way as `baud_rate = "fast"`.
#[derive(Debug, Parser)]
#[command(
    name = "rs232ws-bridge",
    about = "Bridge a serial device to WebSocket clients",
    version
)]
struct Cli {
    /// Settings file to read (and write with --save-config).
    #[arg(long, env = "RS232WS_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device path.
    #[arg(long, env = "RS232WS_DEVICE")]
    device: Option<String>,

    /// Serial baud rate.
    #[arg(long, env = "RS232WS_BAUD")]
    baud: Option<String>,

    /// TCP port for the WebSocket server.
    #[arg(long, env = "RS232WS_PORT")]
    port: Option<String>,

    /// IP address to bind the WebSocket server to.
    ///
    /// `0.0.0.0` accepts clients from any interface, `127.0.0.1` only local ones.
    #[arg(long, env = "RS232WS_BIND")]
    bind: Option<String>,

    /// Do not open a serial device; client messages are dropped.
    #[arg(long, env = "RS232WS_NO_SERIAL")]
    no_serial: bool,

    /// Print the host's serial ports as JSON and exit.
    #[arg(long)]
    list_ports: bool,

    /// Write the merged settings to the settings file before starting.
    #[arg(long)]
    save_config: bool,

    /// Give up opening the serial device after this many milliseconds.
    #[arg(long, default_value_t = 5000)]
    open_timeout_ms: u64,

    /// Pause between teardown and rebuild on reload, in milliseconds.
    #[arg(long, default_value_t = 100)]
    settle_ms: u64,

    /// Longest wait for the listen port to be released on reload, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    port_release_timeout_ms: u64,
}

impl Cli {
    /// The settings file in use, if one can be located.
    fn settings_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(|| default_settings_path().ok())
    }

    /// Reads the settings file and applies the flags on top.
    fn resolve_settings(&self) -> anyhow::Result<RawSettings> {
        let base = match self.settings_path() {
            Some(path) => load_settings(&path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?,
            None => RawSettings::default(),
        };
        Ok(self.overlay(base))
    }

    fn overlay(&self, mut settings: RawSettings) -> RawSettings {
        if let Some(device) = &self.device {
            settings.device_path = device.clone();
        }
        if let Some(baud) = &self.baud {
            settings.baud_rate = RawNumber::from(baud.as_str());
        }
        if let Some(port) = &self.port {
            settings.listen_port = RawNumber::from(port.as_str());
        }
        if let Some(bind) = &self.bind {
            settings.bind_address = Some(bind.clone());
        }
        if self.no_serial {
            settings.serial_enabled = false;
        }
        settings
    }

    fn rebuild_policy(&self) -> RebuildPolicy {
        RebuildPolicy {
            settle_delay: Duration::from_millis(self.settle_ms),
            port_release_timeout: Duration::from_millis(self.port_release_timeout_ms),
            ..RebuildPolicy::default()
        }
    }

    fn deps(&self) -> BridgeDeps {
        BridgeDeps::system().with_open_timeout(Duration::from_millis(self.open_timeout_ms))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `RUST_LOG` selects the level; `info` when unset.  Serial lines are logged
    // under the `rs232ws::data` target, so `RUST_LOG=info,rs232ws::data=off`
    // keeps status output only.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let deps = cli.deps();

    if cli.list_ports {
        let ports = deps
            .enumerator
            .available_ports()
            .context("failed to list serial ports")?;
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    let settings = cli.resolve_settings()?;
    let config = settings.validate().context("invalid settings")?;

    if cli.save_config {
        let path = cli
            .settings_path()
            .context("no settings file location; pass --config")?;
        save_settings(&path, &settings)
            .with_context(|| format!("failed to save settings to {}", path.display()))?;
        info!("settings saved to {}", path.display());
    }

    let service = BridgeService::new(deps, cli.rebuild_policy());
    service.subscribe(EventKind::Data, |event| {
        if let BridgeEvent::Data(line) = event {
            info!(target: "rs232ws::data", "{line}");
        }
    });
    service.subscribe(EventKind::Status, |event| {
        if let BridgeEvent::Status(status) = event {
            if status.is_error() {
                warn!(target: "rs232ws::status", "{status}");
            } else {
                info!(target: "rs232ws::status", "{status}");
            }
        }
    });

    info!("RS232WS bridge starting: {config}");
    service.start(config).await?;

    #[cfg(unix)]
    let mut hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        .context("failed to install SIGHUP handler")?;

    loop {
        #[cfg(unix)]
        let reload = hangup.recv();
        #[cfg(not(unix))]
        let reload = std::future::pending::<Option<()>>();

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("failed to listen for Ctrl+C: {e}");
                }
                info!("shutting down");
                break;
            }
            _ = reload => {
                info!("reloading settings");
                match cli.resolve_settings() {
                    Ok(settings) => match service.apply_settings(&settings).await {
                        Ok(config) => info!("settings applied: {config}"),
                        Err(e) => warn!("settings not applied: {e}"),
                    },
                    Err(e) => warn!("settings not applied: {e:#}"),
                }
            }
        }
    }

    service.stop().await?;
    info!("RS232WS bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
