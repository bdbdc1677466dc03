//! Construction-time configuration for the motor system.
//!
//! One TOML table per motor:
//!
//! ```toml
//! [motors.wp_uv_hwp]
//! backend = "elliptec"
//! port = "/dev/ttyUSB0"
//! address = "2"
//! offset_rad = 0.1745
//! ```
//!
//! Motors sharing a `port` value share one open serial channel.

use crate::error::{MotorError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Which driver family a motor is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Elliptec rotation stage on a shared RS-485 bus.
    Elliptec,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Elliptec => write!(f, "elliptec"),
        }
    }
}

/// Configuration for one motor.
#[derive(Debug, Clone, Deserialize)]
pub struct MotorConfig {
    /// Driver family.
    pub backend: BackendKind,
    /// Serial port path, e.g. `/dev/ttyUSB0`.
    pub port: String,
    /// Single-character bus address (`0`-`9`, `A`-`F`).
    pub address: char,
    /// Zero offset in radians: where the hardware thinks it is when the
    /// logical frame says zero. Defaults to 0.
    #[serde(default)]
    pub offset_rad: f64,
}

/// The whole motor system: named motors, keyed by their unique name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemConfig {
    /// Per-motor configuration tables.
    #[serde(default)]
    pub motors: BTreeMap<String, MotorConfig>,
}

impl SystemConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| MotorError::Config {
            message: e.to_string(),
        })
    }

    /// Load configuration from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| MotorError::Config {
            message: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&text)
    }
}
