//! Error types for the rotator HAL.
//!
//! One enum covers the whole crate. The variants mirror how failures are
//! handled: connection failures are fatal to motor construction, protocol
//! errors are fatal to the call (bus state is unknown afterwards), and
//! hardware faults carry the decoded status so callers can decide what to
//! do. Nothing in this crate retries on its own; retry and backoff policy
//! belongs to the orchestration layer above it.

use crate::codec::DeviceStatus;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, MotorError>;

/// Primary error type for the rotator HAL.
#[derive(Error, Debug)]
pub enum MotorError {
    /// Opening the serial port failed (bad device path, permissions, port
    /// already claimed by the OS). Fatal to the requesting motor's
    /// construction; never retried.
    #[error("failed to open serial port '{port}': {source}")]
    Connection {
        /// Port path that failed to open.
        port: String,
        /// Underlying serial error.
        #[source]
        source: serialport::Error,
    },

    /// Malformed or mismatched response. The bus state after one of these
    /// is unknown, so the call fails without retry.
    #[error("protocol error: {message}")]
    Protocol {
        /// What was expected and what arrived.
        message: String,
    },

    /// The device reported a non-nominal status after a move.
    #[error("device '{address}' reported fault: {status}")]
    HardwareFault {
        /// Bus address of the faulting device.
        address: char,
        /// Decoded status from the device's fault table.
        status: DeviceStatus,
    },

    /// The homing probe failed.
    #[error("error homing motor '{motor}': {source}")]
    Homing {
        /// Name of the motor that failed to home.
        motor: String,
        /// The backend failure that interrupted the probe.
        #[source]
        source: Box<MotorError>,
    },

    /// The device was still reporting activity when the configured motion
    /// deadline expired.
    #[error("device '{address}' still active after {waited_ms} ms")]
    MotionTimeout {
        /// Bus address of the device that never settled.
        address: char,
        /// How long the poll loop waited before giving up.
        waited_ms: u64,
    },

    /// Invalid construction-time configuration.
    #[error("configuration error: {message}")]
    Config {
        /// What was wrong with the configuration.
        message: String,
    },

    /// I/O failure on an already-open channel.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
