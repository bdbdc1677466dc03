//! Pure conversions between angles, pulse counts, and the ASCII-hex wire
//! encoding used by Elliptec devices, plus the device status catalog.
//!
//! All positions on the wire are 32-bit two's-complement pulse counts,
//! rendered as uppercase hex and zero-padded to a fixed field width.
//! [`Pulses`] owns the sign-bit handling so the rest of the crate never
//! touches raw bit patterns.

use crate::error::{MotorError, Result};

/// Signed pulse count with the wire's 32-bit two's-complement width.
///
/// A pulse is the device's smallest step; `ppmu` (pulses per degree,
/// derived from the device's resolution and travel) converts between
/// pulses and physical angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulses(pub i32);

impl Pulses {
    /// Convert an angle in radians to a pulse count.
    ///
    /// Radians become degrees, then `round(|deg| * ppmu)` with the sign
    /// reapplied. Negative zero collapses to zero pulses. Travel/ppmu
    /// pairs are chosen so a full revolution fits in 32 bits; that is a
    /// design-time constraint, not a runtime check.
    pub fn from_radians(angle_radians: f64, ppmu: f64) -> Self {
        let deg = angle_radians.to_degrees();
        let magnitude = (deg.abs() * ppmu).round() as i64;
        let signed = if deg < 0.0 { -magnitude } else { magnitude };
        Pulses(signed as i32)
    }

    /// Convert this pulse count back to an angle in radians.
    pub fn to_radians(self, ppmu: f64) -> f64 {
        (f64::from(self.0) / ppmu).to_radians()
    }

    /// Render as uppercase hex of the 32-bit two's-complement bit pattern,
    /// left-zero-padded to `width` ASCII characters.
    ///
    /// Negative counts always occupy 8 characters, so `width` should be at
    /// least 8 anywhere negatives can appear.
    pub fn to_wire(self, width: usize) -> Vec<u8> {
        format!("{:0width$X}", self.0 as u32).into_bytes()
    }

    /// Parse a hex field as an unsigned 32-bit integer and reinterpret it
    /// as signed two's complement (top bit = sign).
    pub fn from_wire(hex: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(hex).map_err(|_| MotorError::Protocol {
            message: format!("position field is not ASCII hex: {hex:?}"),
        })?;
        let raw = u32::from_str_radix(text.trim(), 16).map_err(|_| MotorError::Protocol {
            message: format!("failed to parse position hex: {text:?}"),
        })?;
        Ok(Pulses(raw as i32))
    }
}

/// Encode an angle in radians as a fixed-width ASCII-hex pulse field.
pub fn angle_to_wire(angle_radians: f64, ppmu: f64, width: usize) -> Vec<u8> {
    Pulses::from_radians(angle_radians, ppmu).to_wire(width)
}

/// Decode a fixed-width ASCII-hex pulse field to an angle in radians.
pub fn wire_to_angle(hex: &[u8], ppmu: f64) -> Result<f64> {
    Ok(Pulses::from_wire(hex)?.to_radians(ppmu))
}

/// Device-reported fault codes from the `GS` status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FaultCode {
    /// Code 01: communication timeout.
    CommunicationTimeout = 0x01,
    /// Code 02: mechanical timeout.
    MechanicalTimeout = 0x02,
    /// Code 03: invalid command.
    InvalidCommand = 0x03,
    /// Code 04: value out of range.
    ValueOutOfRange = 0x04,
    /// Code 05: module isolated.
    ModuleIsolated = 0x05,
    /// Code 06: module out of isolation.
    ModuleOutOfIsolation = 0x06,
    /// Code 07: initializing error.
    InitializingError = 0x07,
    /// Code 08: thermal error.
    ThermalError = 0x08,
    /// Code 09: busy. Expected transient state while a move is in flight.
    Busy = 0x09,
    /// Code 0A: sensor error.
    SensorError = 0x0A,
    /// Code 0B: motor error.
    MotorError = 0x0B,
    /// Code 0C: out of range error.
    OutOfRange = 0x0C,
    /// Code 0D: over current error.
    OverCurrent = 0x0D,
}

impl FaultCode {
    /// Look up a raw code in the fault table.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::CommunicationTimeout),
            0x02 => Some(Self::MechanicalTimeout),
            0x03 => Some(Self::InvalidCommand),
            0x04 => Some(Self::ValueOutOfRange),
            0x05 => Some(Self::ModuleIsolated),
            0x06 => Some(Self::ModuleOutOfIsolation),
            0x07 => Some(Self::InitializingError),
            0x08 => Some(Self::ThermalError),
            0x09 => Some(Self::Busy),
            0x0A => Some(Self::SensorError),
            0x0B => Some(Self::MotorError),
            0x0C => Some(Self::OutOfRange),
            0x0D => Some(Self::OverCurrent),
            _ => None,
        }
    }

    /// Human-readable description, as documented in the protocol manual.
    pub fn description(self) -> &'static str {
        match self {
            Self::CommunicationTimeout => "communication timeout",
            Self::MechanicalTimeout => "mechanical timeout",
            Self::InvalidCommand => "invalid command",
            Self::ValueOutOfRange => "value out of range",
            Self::ModuleIsolated => "module isolated",
            Self::ModuleOutOfIsolation => "module out of isolation",
            Self::InitializingError => "initializing error",
            Self::ThermalError => "thermal error",
            Self::Busy => "busy",
            Self::SensorError => "sensor error",
            Self::MotorError => "motor error",
            Self::OutOfRange => "out of range error",
            Self::OverCurrent => "over current error",
        }
    }
}

/// Decoded result of a status query. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Code 00, nominal.
    Ok,
    /// A code from the fault table.
    Fault(FaultCode),
    /// A code outside the fault table, carrying the raw field text.
    Unknown(String),
}

impl DeviceStatus {
    /// True only for the nominal status.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Fault(code) => write!(f, "{}", code.description()),
            Self::Unknown(raw) => write!(f, "unknown status code {raw:?}"),
        }
    }
}

/// Decode a 2-character hex status field. Never fails: unrecognized codes
/// map to [`DeviceStatus::Unknown`].
pub fn decode_status(code: &[u8]) -> DeviceStatus {
    let text = String::from_utf8_lossy(code);
    match u8::from_str_radix(text.trim(), 16) {
        Ok(0x00) => DeviceStatus::Ok,
        Ok(raw) => FaultCode::from_u8(raw)
            .map(DeviceStatus::Fault)
            .unwrap_or_else(|| DeviceStatus::Unknown(text.into_owned())),
        Err(_) => DeviceStatus::Unknown(text.into_owned()),
    }
}
