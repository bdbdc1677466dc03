//! Hardware abstraction layer for the rotation stages that set wave-plate
//! angles in the lab.
//!
//! The crate is organized leaves-first:
//!
//! - [`codec`]: pure conversions between radians, pulse counts, and the
//!   fixed-width ASCII-hex wire encoding, plus the device status catalog.
//! - [`ports`]: at most one open serial channel per port path, shared by
//!   every motor on that bus.
//! - [`elliptec`]: the Elliptec (Thorlabs ELLx) wire-protocol driver:
//!   instruction framing, device identification, and the blocking
//!   move-and-confirm state machine.
//! - [`motor`]: the backend-independent [`Motor`] contract that applies a
//!   per-motor zero offset on top of whatever the backend reports, and the
//!   [`MotorSet`] of live motors.
//! - [`config`]: construction-time TOML configuration.
//!
//! Everything is synchronous and blocking; a move returns only once the
//! device reports motion complete. Callers needing retry, scheduling, or
//! cancellation policy build it above this crate.
//!
//! # Example
//!
//! ```no_run
//! use rotator_hal::{MotorSet, PortRegistry, SystemConfig};
//!
//! fn main() -> rotator_hal::Result<()> {
//!     let config = SystemConfig::from_path("motors.toml")?;
//!     let ports = PortRegistry::new();
//!     let mut motors = MotorSet::from_config(&config, &ports)?;
//!
//!     let wp = motors.get_mut("wp_uv_hwp").expect("configured motor");
//!     wp.goto(45.0f64.to_radians())?;
//!     println!("{} at {:.4} rad", wp.name(), wp.pos());
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod elliptec;
pub mod error;
pub mod motor;
pub mod ports;

pub use codec::{DeviceStatus, FaultCode, Pulses};
pub use config::{BackendKind, MotorConfig, SystemConfig};
pub use elliptec::{DeviceInfo, ElliptecDriver, PollPolicy};
pub use error::{MotorError, Result};
pub use motor::{Motor, MotorSet, RotationBackend};
pub use ports::{BusIo, DynBus, PortRegistry, SharedBus};
