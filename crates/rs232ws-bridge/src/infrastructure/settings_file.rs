//! TOML persistence for bridge settings.
//!
//! The default file lives in the platform config directory:
//! - Windows:  `%APPDATA%\rs232ws\config.toml`
//! - Linux:    `~/.config/rs232ws/config.toml`
//! - macOS:    `~/Library/Application Support/rs232ws/config.toml`
//!
//! ```toml
//! device_path = "/dev/ttyUSB0"
//! baud_rate = 9600
//! listen_port = 58081
//! serial_enabled = true
//! bind_address = "0.0.0.0"
//! ```
//!
//! Every key is optional.  The camelCase keys of older settings files
//! (`port`, `baudRate`, `wsPort`, `usePort`) are accepted as well.  Values are
//! loaded as [`RawSettings`] and validated separately, so a file holding
//! `baud_rate = "fast"` loads fine and is rejected by validation with a
//! field-level error.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::RawSettings;

/// Error type for settings file operations.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Full path of the default settings file.
///
/// # Errors
///
/// [`SettingsError::NoPlatformConfigDir`] if the base directory cannot be
/// determined from the environment.
pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(SettingsError::NoPlatformConfigDir)
}

/// Loads settings from `path`, or the defaults if the file does not exist.
///
/// # Errors
///
/// [`SettingsError::Io`] for file-system errors other than "not found",
/// [`SettingsError::Parse`] if the TOML is malformed.
pub fn load_settings(path: &Path) -> Result<RawSettings, SettingsError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_settings(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RawSettings::default()),
        Err(source) => Err(SettingsError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn parse_settings(content: &str) -> Result<RawSettings, SettingsError> {
    Ok(toml::from_str(content)?)
}

/// Writes `settings` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// [`SettingsError::Io`] for file-system failures,
/// [`SettingsError::Serialize`] if serialization fails.
pub fn save_settings(path: &Path, settings: &RawSettings) -> Result<(), SettingsError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| SettingsError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(settings)?;
    std::fs::write(path, content).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("rs232ws"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("rs232ws"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("rs232ws")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
