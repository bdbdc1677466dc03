//! Backend-independent motor abstraction with a calibratable zero offset.
//!
//! A [`Motor`] owns one backend driver and a per-motor `offset`: the angle
//! the hardware thinks it is at when the logical frame says zero. Every
//! position crossing the boundary has the offset applied, so callers only
//! ever see the logical frame.

use crate::codec::DeviceStatus;
use crate::config::{BackendKind, SystemConfig};
use crate::elliptec::ElliptecDriver;
use crate::error::{MotorError, Result};
use crate::ports::PortRegistry;
use std::collections::HashMap;
use std::f64::consts::TAU;

/// Capability set a rotation backend must provide.
///
/// All angles are absolute radians in the hardware frame; the offset
/// transform lives in [`Motor`], not here. Set and relative moves block
/// until motion completes and return the absolute angle actually reached.
pub trait RotationBackend: Send {
    /// Query the absolute position.
    fn get_position(&self) -> Result<f64>;
    /// Move to an absolute angle; returns the angle reached (or `0.0` for
    /// a bare-ACK confirmation).
    fn set_position(&self, angle_radians: f64) -> Result<f64>;
    /// Move by a relative angle; returns the absolute angle reached.
    fn move_relative(&self, angle_radians: f64) -> Result<f64>;
    /// Whether the device is actively moving.
    fn is_active(&self) -> Result<bool>;
    /// Decode the device's current status.
    fn get_status(&self) -> Result<DeviceStatus>;
}

/// One physical rotation stage in the caller's logical angle frame.
pub struct Motor {
    name: String,
    kind: BackendKind,
    backend: Box<dyn RotationBackend>,
    /// Where the hardware thinks it is when the logical frame says zero.
    /// Fixed at construction, in radians.
    offset: f64,
    /// Last-known logical position; updated only after a successful move
    /// or an explicit query.
    pos: f64,
}

impl Motor {
    /// Wrap a backend under `name` with a fixed zero offset (radians).
    pub fn new(
        name: impl Into<String>,
        kind: BackendKind,
        backend: Box<dyn RotationBackend>,
        offset: f64,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            backend,
            offset,
            pos: 0.0,
        }
    }

    /// The motor's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Which backend family drives this motor.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// The zero offset fixed at construction, in radians.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Last-known logical position in radians (offset already applied).
    pub fn pos(&self) -> f64 {
        self.pos
    }

    /// Move to a logical angle (radians); returns the logical position
    /// actually reached.
    pub fn goto(&mut self, angle_radians: f64) -> Result<f64> {
        let set_point = (angle_radians + self.offset).rem_euclid(TAU);
        let reached = self.backend.set_position(set_point)?;
        self.pos = reached - self.offset;
        Ok(self.pos)
    }

    /// Move by a relative angle (radians); returns the logical position
    /// actually reached, which may differ from `pos() + angle` by pulse
    /// granularity.
    pub fn move_by(&mut self, angle_radians: f64) -> Result<f64> {
        let reached = self.backend.move_relative(angle_radians)?;
        self.pos = reached - self.offset;
        Ok(self.pos)
    }

    /// Return to the logical zero position.
    pub fn zero(&mut self) -> Result<f64> {
        self.goto(0.0)
    }

    /// Probe the hardware zero by commanding an absolute move to 0.
    ///
    /// Any backend failure surfaces as [`MotorError::Homing`] naming this
    /// motor and carrying the raw fault.
    pub fn home(&mut self) -> Result<f64> {
        match self.backend.set_position(0.0) {
            Ok(reached) => {
                self.pos = reached - self.offset;
                Ok(self.pos)
            }
            Err(source) => Err(MotorError::Homing {
                motor: self.name.clone(),
                source: Box::new(source),
            }),
        }
    }

    /// Query the backend for the absolute position and refresh the cached
    /// logical position.
    pub fn refresh_pos(&mut self) -> Result<f64> {
        self.pos = self.backend.get_position()? - self.offset;
        Ok(self.pos)
    }

    /// Whether the motor is actively moving.
    pub fn is_active(&self) -> Result<bool> {
        self.backend.is_active()
    }

    /// The backend's current status.
    pub fn status(&self) -> Result<DeviceStatus> {
        self.backend.get_status()
    }
}

impl std::fmt::Display for Motor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-motor '{}'", self.kind, self.name)
    }
}

/// The set of live motors, keyed by name.
///
/// Owned context rather than process-global state: whoever wires the
/// system holds the set (and the [`PortRegistry`] it was built from) for
/// the process lifetime.
#[derive(Default)]
pub struct MotorSet {
    motors: HashMap<String, Motor>,
}

impl MotorSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured motor, acquiring shared ports as needed.
    ///
    /// A connection or identification failure for any motor fails the
    /// whole construction; there is no partial rig.
    pub fn from_config(config: &SystemConfig, ports: &PortRegistry) -> Result<Self> {
        let mut set = Self::new();
        for (name, cfg) in &config.motors {
            let motor = match cfg.backend {
                BackendKind::Elliptec => {
                    let bus = ports.acquire(&cfg.port)?;
                    let driver = ElliptecDriver::new(bus, cfg.address)?;
                    Motor::new(name.clone(), cfg.backend, Box::new(driver), cfg.offset_rad)
                }
            };
            tracing::info!(motor = %name, backend = %cfg.backend, "registered motor");
            set.insert(motor);
        }
        Ok(set)
    }

    /// Add a hand-built motor to the set.
    pub fn insert(&mut self, motor: Motor) {
        self.motors.insert(motor.name().to_string(), motor);
    }

    /// Look up a motor by name.
    pub fn get(&self, name: &str) -> Option<&Motor> {
        self.motors.get(name)
    }

    /// Look up a motor by name, mutably (moves require `&mut`).
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Motor> {
        self.motors.get_mut(name)
    }

    /// Number of live motors.
    pub fn len(&self) -> usize {
        self.motors.len()
    }

    /// Whether the set holds no motors.
    pub fn is_empty(&self) -> bool {
        self.motors.is_empty()
    }

    /// Iterate over motor names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.motors.keys().map(String::as_str)
    }
}
