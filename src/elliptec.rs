//! Elliptec (Thorlabs ELLx) rotation stage driver.
//!
//! Protocol: RS-485 multidrop bus, 9600 baud, ASCII-framed commands.
//! Reference: ELLx modules protocol manual.
//!
//! Framing is `[address][2-byte instruction][data]`; responses echo the
//! address followed by a 2-byte uppercase reply code. Positions travel as
//! 8-character hex pulse counts (see [`crate::codec`]).
//!
//! A move is a blocking three-step exchange: send `ma`/`mr` keeping the
//! response in hand, poll the activity query until the device reports it
//! is no longer moving, then decode the held response as either a position
//! report or a status report.

use crate::codec::{self, decode_status, DeviceStatus, Pulses};
use crate::error::{MotorError, Result};
use crate::motor::RotationBackend;
use crate::ports::{DynBus, SharedBus};
use std::time::{Duration, Instant};

/// Width of a pulse-count field on the wire, in hex characters.
const POSITION_HEX_WIDTH: usize = 8;

/// `in` reply: addr + "IN" + 30 data characters.
const INFO_RESP_LEN: usize = 33;
/// `gp`/`ma`/`mr`/`go` reply: addr + code + 8 hex characters.
const POSITION_RESP_LEN: usize = 11;
/// `gs` reply: addr + "GS" + 2 hex characters.
const STATUS_RESP_LEN: usize = 5;
/// `i1` reply: addr + "I1" + motor info block.
const ACTIVITY_RESP_LEN: usize = 24;

/// How motion-completion polling behaves.
///
/// The interval and deadline are injectable so tests can simulate
/// completion deterministically and production callers can bound the
/// worst-case blocking of a mechanically stuck device.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Delay between consecutive activity queries.
    pub interval: Duration,
    /// Give up after this long; `None` waits indefinitely.
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            deadline: None,
        }
    }
}

/// Identity block read from the device once at construction.
///
/// Response layout (ASCII, 33 characters):
/// addr(1) "IN"(2) model(2) serial(8) year(4) firmware(2) hardware(2)
/// travel(4, hex degrees) resolution(8, hex pulses per revolution).
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Model identifier, e.g. "0E" for an ELL14.
    pub model: String,
    /// Serial number, 8 ASCII characters.
    pub serial_no: String,
    /// Manufacture year, 4 ASCII characters.
    pub year: String,
    /// Firmware revision.
    pub firmware: u8,
    /// Hardware revision.
    pub hardware: u8,
    /// Travel range in degrees; 360 for a rotation stage.
    pub travel_deg: u32,
    /// Encoder resolution in pulses per full travel.
    pub pulses_per_rev: u32,
}

impl DeviceInfo {
    /// Parse an `IN` response.
    pub fn parse(resp: &[u8]) -> Result<Self> {
        if resp.len() < INFO_RESP_LEN {
            return Err(MotorError::Protocol {
                message: format!("IN response too short: {} bytes", resp.len()),
            });
        }
        let text =
            std::str::from_utf8(&resp[..INFO_RESP_LEN]).map_err(|_| MotorError::Protocol {
                message: "IN response is not ASCII".to_string(),
            })?;

        let info = Self {
            model: text[3..5].to_string(),
            serial_no: text[5..13].to_string(),
            year: text[13..17].to_string(),
            firmware: hex_field(&text[17..19], "firmware")? as u8,
            hardware: hex_field(&text[19..21], "hardware")? as u8,
            travel_deg: hex_field(&text[21..25], "travel")?,
            pulses_per_rev: hex_field(&text[25..33], "resolution")?,
        };

        if info.travel_deg == 0 || info.pulses_per_rev == 0 {
            return Err(MotorError::Protocol {
                message: format!(
                    "device reported zero travel or resolution: travel={} pulses={}",
                    info.travel_deg, info.pulses_per_rev
                ),
            });
        }
        Ok(info)
    }

    /// Pulses per degree of travel, the `ppmu` the codec converts with.
    pub fn ppmu(&self) -> f64 {
        f64::from(self.pulses_per_rev) / f64::from(self.travel_deg)
    }
}

fn hex_field(text: &str, what: &str) -> Result<u32> {
    u32::from_str_radix(text, 16).map_err(|_| MotorError::Protocol {
        message: format!("invalid {what} hex field: {text:?}"),
    })
}

/// Driver for one addressed Elliptec rotation stage on a shared bus.
///
/// The channel comes from [`crate::ports::PortRegistry`]; several drivers
/// with different addresses may hold clones of the same channel. Every
/// command/response exchange locks the channel for its full duration.
pub struct ElliptecDriver {
    bus: SharedBus,
    address: u8,
    info: DeviceInfo,
    ppmu: f64,
    poll: PollPolicy,
}

impl ElliptecDriver {
    /// Connect to the device at `address` and read its identity block.
    ///
    /// Fails if the address is not a single ASCII alphanumeric character,
    /// if the info exchange fails, or if the device reports zero travel or
    /// resolution.
    pub fn new(bus: SharedBus, address: char) -> Result<Self> {
        Self::with_poll_policy(bus, address, PollPolicy::default())
    }

    /// Like [`new`](Self::new), with explicit motion-poll behavior.
    pub fn with_poll_policy(bus: SharedBus, address: char, poll: PollPolicy) -> Result<Self> {
        if !address.is_ascii_alphanumeric() {
            return Err(MotorError::Config {
                message: format!("invalid device address {address:?}"),
            });
        }
        let addr = address as u8;

        let resp = Self::exchange(&bus, addr, b"in", &[], INFO_RESP_LEN)?;
        Self::check_reply(addr, &resp, b"in")?;
        let info = DeviceInfo::parse(&resp)?;

        let ppmu = info.ppmu();
        if !(100.0..1000.0).contains(&ppmu) {
            tracing::warn!(address = %address, ppmu, "implausible pulses-per-degree calibration");
        }
        if info.travel_deg != 360 {
            tracing::warn!(
                address = %address,
                travel_deg = info.travel_deg,
                "device travel is not a full revolution"
            );
        }
        tracing::info!(
            address = %address,
            model = %info.model,
            serial = %info.serial_no,
            ppmu,
            "identified elliptec device"
        );

        Ok(Self {
            bus,
            address: addr,
            info,
            ppmu,
            poll,
        })
    }

    /// The device identity read at construction.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// This driver's bus address.
    pub fn address(&self) -> char {
        char::from(self.address)
    }

    /// Pulses per degree used for angle conversion.
    pub fn ppmu(&self) -> f64 {
        self.ppmu
    }

    /// Move to an absolute angle (radians, relative to the device's home).
    ///
    /// Blocks until the device reports it is no longer active, then
    /// returns the absolute angle actually reached, or `0.0` when the
    /// device confirms the move with a bare nominal status instead of a
    /// position report. A non-nominal status becomes
    /// [`MotorError::HardwareFault`].
    pub fn set_absolute_position(&self, angle_radians: f64) -> Result<f64> {
        let data = codec::angle_to_wire(angle_radians, self.ppmu, POSITION_HEX_WIDTH);
        let resp = Self::exchange(&self.bus, self.address, b"ma", &data, POSITION_RESP_LEN)?;
        self.wait_until_settled()?;
        self.interpret_move_reply(&resp)
    }

    /// Move by a relative angle (radians).
    ///
    /// Returns the absolute angle reached, which may differ from the
    /// requested delta by mechanical rounding to pulse granularity; treat
    /// the return value, not the request, as ground truth.
    pub fn move_relative(&self, angle_radians: f64) -> Result<f64> {
        let data = codec::angle_to_wire(angle_radians, self.ppmu, POSITION_HEX_WIDTH);
        let resp = Self::exchange(&self.bus, self.address, b"mr", &data, POSITION_RESP_LEN)?;
        self.wait_until_settled()?;
        self.interpret_move_reply(&resp)
    }

    /// Whether the device reports itself as actively moving.
    pub fn is_active(&self) -> Result<bool> {
        let resp = Self::exchange(&self.bus, self.address, b"i1", &[], ACTIVITY_RESP_LEN)?;
        Self::check_reply(self.address, &resp, b"i1")?;
        if resp.len() <= 4 {
            return Err(MotorError::Protocol {
                message: format!("activity response too short: {} bytes", resp.len()),
            });
        }
        Ok(resp[4] != b'0')
    }

    /// Current absolute position in radians.
    ///
    /// With `cached` bytes supplied, decodes them instead of querying the
    /// device; operations that already hold a position report reuse it
    /// this way instead of re-querying.
    pub fn position(&self, cached: Option<&[u8]>) -> Result<f64> {
        let owned;
        let resp = match cached {
            Some(resp) => resp,
            None => {
                owned = Self::exchange(&self.bus, self.address, b"gp", &[], POSITION_RESP_LEN)?;
                Self::check_reply(self.address, &owned, b"po")?;
                &owned
            }
        };
        Self::position_from_reply(resp, self.ppmu)
    }

    /// Current device status.
    ///
    /// With `cached` bytes supplied, decodes them instead of querying.
    pub fn status(&self, cached: Option<&[u8]>) -> Result<DeviceStatus> {
        let owned;
        let resp = match cached {
            Some(resp) => resp,
            None => {
                owned = Self::exchange(&self.bus, self.address, b"gs", &[], STATUS_RESP_LEN)?;
                Self::check_reply(self.address, &owned, b"gs")?;
                &owned
            }
        };
        if resp.len() < STATUS_RESP_LEN {
            return Err(MotorError::Protocol {
                message: format!("status response too short: {} bytes", resp.len()),
            });
        }
        Ok(decode_status(&resp[3..5]))
    }

    /// Read the device's persistent home offset, in pulses.
    pub fn get_home_offset(&self) -> Result<Pulses> {
        let resp = Self::exchange(&self.bus, self.address, b"go", &[], POSITION_RESP_LEN)?;
        Self::check_reply(self.address, &resp, b"ho")?;
        if resp.len() < POSITION_RESP_LEN {
            return Err(MotorError::Protocol {
                message: format!("home offset response too short: {} bytes", resp.len()),
            });
        }
        Pulses::from_wire(&resp[3..POSITION_RESP_LEN])
    }

    /// Rewrite the device's persistent home offset so the current position
    /// becomes the new physical zero, then return the re-read position
    /// (which should be at or near zero).
    ///
    /// This mutates hardware state permanently. There is no undo unless
    /// the previous offset was recorded first via
    /// [`get_home_offset`](Self::get_home_offset). Nothing in this crate
    /// calls it implicitly.
    pub fn set_hardware_home(&self) -> Result<f64> {
        let resp = Self::exchange(&self.bus, self.address, b"gp", &[], POSITION_RESP_LEN)?;
        Self::check_reply(self.address, &resp, b"po")?;
        let pos = Pulses::from_wire(&resp[3..POSITION_RESP_LEN])?;
        let old = self.get_home_offset()?;

        let revolution = i64::from(self.info.pulses_per_rev);
        let new_offset = (i64::from(old.0) + i64::from(pos.0)).rem_euclid(revolution);
        let data = Pulses(new_offset as i32).to_wire(POSITION_HEX_WIDTH);

        tracing::info!(
            address = %self.address(),
            old_offset = old.0,
            new_offset,
            "rewriting hardware home offset"
        );
        Self::send(&self.bus, self.address, b"so", &data)?;
        self.position(None)
    }

    /// Block until the device stops reporting activity.
    ///
    /// Polls at the configured interval; repeated active/busy responses
    /// are expected transient state, not errors. With a deadline set,
    /// exceeding it yields [`MotorError::MotionTimeout`]; without one the
    /// wait is unbounded.
    pub fn wait_until_settled(&self) -> Result<()> {
        let start = Instant::now();
        loop {
            if !self.is_active()? {
                return Ok(());
            }
            if let Some(deadline) = self.poll.deadline {
                if start.elapsed() >= deadline {
                    return Err(MotorError::MotionTimeout {
                        address: self.address(),
                        waited_ms: start.elapsed().as_millis() as u64,
                    });
                }
            }
            tracing::trace!(address = %self.address(), "device still active");
            if !self.poll.interval.is_zero() {
                std::thread::sleep(self.poll.interval);
            }
        }
    }

    /// Decode the response held from a `ma`/`mr` exchange.
    fn interpret_move_reply(&self, resp: &[u8]) -> Result<f64> {
        if resp.len() < 3 {
            return Err(MotorError::Protocol {
                message: format!("move response too short: {} bytes", resp.len()),
            });
        }
        match &resp[1..3] {
            b"GS" => {
                if resp.len() < STATUS_RESP_LEN {
                    return Err(MotorError::Protocol {
                        message: format!("status response too short: {} bytes", resp.len()),
                    });
                }
                let status = decode_status(&resp[3..5]);
                if status.is_ok() {
                    // Moved, but the final confirmation was a bare ACK.
                    Ok(0.0)
                } else {
                    Err(MotorError::HardwareFault {
                        address: self.address(),
                        status,
                    })
                }
            }
            b"PO" => Self::position_from_reply(resp, self.ppmu),
            other => Err(MotorError::Protocol {
                message: format!(
                    "unexpected reply code {:?} from device '{}'",
                    String::from_utf8_lossy(other),
                    self.address()
                ),
            }),
        }
    }

    fn position_from_reply(resp: &[u8], ppmu: f64) -> Result<f64> {
        if resp.len() < POSITION_RESP_LEN {
            return Err(MotorError::Protocol {
                message: format!("position response too short: {} bytes", resp.len()),
            });
        }
        codec::wire_to_angle(&resp[3..POSITION_RESP_LEN], ppmu)
    }

    /// Validate the address byte and reply-code echo of a response.
    fn check_reply(address: u8, resp: &[u8], expect: &[u8; 2]) -> Result<()> {
        if resp.len() < 3 {
            return Err(MotorError::Protocol {
                message: format!("response too short: {} bytes", resp.len()),
            });
        }
        if resp[0] != address {
            return Err(MotorError::Protocol {
                message: format!(
                    "response addressed to '{}', expected '{}'",
                    char::from(resp[0]),
                    char::from(address)
                ),
            });
        }
        if !resp[1..3].eq_ignore_ascii_case(expect) {
            return Err(MotorError::Protocol {
                message: format!(
                    "expected reply code {:?} but got {:?}",
                    String::from_utf8_lossy(expect).to_uppercase(),
                    String::from_utf8_lossy(&resp[1..3])
                ),
            });
        }
        Ok(())
    }

    /// One full command/response exchange, atomic on the shared bus.
    ///
    /// Stale receive-buffer bytes (a previous response's CR LF, or traffic
    /// for another device on the bus) are discarded before sending. The
    /// read collects up to `resp_len` bytes, stopping early at the port
    /// timeout so a shorter-than-expected reply (e.g. a `GS` fault where a
    /// position report was expected) still reaches the decode step.
    fn exchange(
        bus: &SharedBus,
        address: u8,
        inst: &[u8; 2],
        data: &[u8],
        resp_len: usize,
    ) -> Result<Vec<u8>> {
        let mut bus = bus.lock();
        bus.discard_input()?;
        Self::write_frame(&mut bus, address, inst, data)?;
        let resp = Self::read_reply(&mut bus, resp_len)?;
        tracing::debug!(
            address = %char::from(address),
            cmd = %String::from_utf8_lossy(inst),
            response = %String::from_utf8_lossy(&resp),
            "elliptec exchange"
        );
        Ok(resp)
    }

    /// Fire-and-forget instruction (only `so` expects no reply).
    fn send(bus: &SharedBus, address: u8, inst: &[u8; 2], data: &[u8]) -> Result<()> {
        let mut bus = bus.lock();
        Self::write_frame(&mut bus, address, inst, data)
    }

    fn write_frame(bus: &mut DynBus, address: u8, inst: &[u8; 2], data: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(3 + data.len());
        frame.push(address);
        frame.extend_from_slice(inst);
        frame.extend_from_slice(data);
        bus.write_all(&frame)?;
        bus.flush()?;
        Ok(())
    }

    fn read_reply(bus: &mut DynBus, want: usize) -> Result<Vec<u8>> {
        let mut resp = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            match bus.read(&mut resp[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    break
                }
                Err(e) => return Err(e.into()),
            }
        }
        resp.truncate(filled);
        if resp.is_empty() {
            return Err(MotorError::Protocol {
                message: "device returned no response".to_string(),
            });
        }
        Ok(resp)
    }
}

impl RotationBackend for ElliptecDriver {
    fn get_position(&self) -> Result<f64> {
        self.position(None)
    }

    fn set_position(&self, angle_radians: f64) -> Result<f64> {
        self.set_absolute_position(angle_radians)
    }

    fn move_relative(&self, angle_radians: f64) -> Result<f64> {
        ElliptecDriver::move_relative(self, angle_radians)
    }

    fn is_active(&self) -> Result<bool> {
        ElliptecDriver::is_active(self)
    }

    fn get_status(&self) -> Result<DeviceStatus> {
        self.status(None)
    }
}
