//! End-to-end tests over a scripted fake bus.
//!
//! The fake implements [`BusIo`] over in-memory frames and is injected
//! through [`PortRegistry::insert`], so every test exercises the real
//! framing, codec, and move state machine without hardware.

use rotator_hal::{
    BusIo, DeviceStatus, ElliptecDriver, FaultCode, MotorError, MotorSet, PollPolicy,
    PortRegistry, SystemConfig,
};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =============================================================================
// Scripted bus
// =============================================================================

#[derive(Default)]
struct BusState {
    /// Responses to serve, one frame per exchange.
    script: VecDeque<Vec<u8>>,
    /// Remainder of the frame currently being read.
    pending: Vec<u8>,
    /// One frame already served since the last write.
    served: bool,
    /// Every frame the driver wrote, in order.
    written: Vec<Vec<u8>>,
}

/// In-memory [`BusIo`] that serves one scripted response per command.
///
/// A short scripted frame is followed by timeout, matching a serial port
/// whose device sent fewer bytes than the driver asked for.
struct ScriptedBus(Arc<Mutex<BusState>>);

fn scripted(script: Vec<Vec<u8>>) -> (ScriptedBus, Arc<Mutex<BusState>>) {
    let state = Arc::new(Mutex::new(BusState {
        script: script.into(),
        ..BusState::default()
    }));
    (ScriptedBus(state.clone()), state)
}

impl Read for ScriptedBus {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.0.lock().unwrap();
        if state.pending.is_empty() {
            if state.served || state.script.is_empty() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "no scripted response",
                ));
            }
            let next = state.script.pop_front().unwrap();
            state.pending = next;
            state.served = true;
        }
        let n = buf.len().min(state.pending.len());
        buf[..n].copy_from_slice(&state.pending[..n]);
        state.pending.drain(..n);
        Ok(n)
    }
}

impl Write for ScriptedBus {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.0.lock().unwrap();
        state.written.push(buf.to_vec());
        state.served = false;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl BusIo for ScriptedBus {
    fn discard_input(&mut self) -> std::io::Result<()> {
        self.0.lock().unwrap().pending.clear();
        Ok(())
    }
}

// =============================================================================
// Frame builders (ELL14: travel 360 deg, resolution 143360 pulses)
// =============================================================================

const PPMU: f64 = 143360.0 / 360.0;
const PULSE_RAD: f64 = std::f64::consts::TAU / 143360.0;

fn info_resp(addr: u8) -> Vec<u8> {
    let mut resp = b"2IN0E1140051720231701016800023000".to_vec();
    resp[0] = addr;
    resp
}

fn po_resp(pulses: i32) -> Vec<u8> {
    format!("2PO{:08X}", pulses as u32).into_bytes()
}

fn gs_resp(code: &str) -> Vec<u8> {
    format!("2GS{code}").into_bytes()
}

fn i1_resp(active: bool) -> Vec<u8> {
    let mut resp = format!("2I11{}", u8::from(active)).into_bytes();
    resp.resize(24, b'0');
    resp
}

/// Build a driver over a scripted bus with fast polling and a test deadline.
fn scripted_driver(script: Vec<Vec<u8>>) -> (ElliptecDriver, Arc<Mutex<BusState>>) {
    let (bus, state) = scripted(script);
    let registry = PortRegistry::new();
    let shared = registry.insert("/dev/ttyFAKE0", Box::new(bus));
    let poll = PollPolicy {
        interval: Duration::ZERO,
        deadline: Some(Duration::from_secs(5)),
    };
    let driver = ElliptecDriver::with_poll_policy(shared, '2', poll).unwrap();
    (driver, state)
}

fn written(state: &Arc<Mutex<BusState>>) -> Vec<Vec<u8>> {
    state.lock().unwrap().written.clone()
}

// =============================================================================
// Driver behavior
// =============================================================================

#[test]
fn construction_reads_device_info() {
    let (driver, state) = scripted_driver(vec![info_resp(b'2')]);
    assert_eq!(driver.info().serial_no, "11400517");
    assert_eq!(driver.info().pulses_per_rev, 143360);
    assert!((driver.ppmu() - PPMU).abs() < 1e-9);
    assert_eq!(written(&state), vec![b"2in".to_vec()]);
}

#[test]
fn absolute_move_encodes_target_and_returns_position() {
    // 10 degrees -> round(10 * 398.222) = 3982 pulses = 0xF8E.
    let (driver, state) = scripted_driver(vec![info_resp(b'2'), po_resp(3982), i1_resp(false)]);
    let reached = driver
        .set_absolute_position(10.0f64.to_radians())
        .unwrap();
    assert!((reached - 10.0f64.to_radians()).abs() < PULSE_RAD);

    let frames = written(&state);
    assert_eq!(frames[1], b"2ma00000F8E".to_vec());
    assert_eq!(frames[2], b"2i1".to_vec());
}

#[test]
fn move_blocks_until_activity_clears() {
    // Three active polls before the device settles; the pending response
    // must only be decoded after the fourth poll observes inactive.
    let (driver, state) = scripted_driver(vec![
        info_resp(b'2'),
        po_resp(0),
        i1_resp(true),
        i1_resp(true),
        i1_resp(true),
        i1_resp(false),
    ]);
    driver.set_absolute_position(0.0).unwrap();

    let frames = written(&state);
    // in + ma + four activity queries.
    assert_eq!(frames.len(), 6);
    assert!(frames[2..].iter().all(|f| f == b"2i1"));
}

#[test]
fn stuck_device_hits_motion_deadline() {
    let (bus, _) = scripted(vec![info_resp(b'2'), po_resp(0), i1_resp(true)]);
    let registry = PortRegistry::new();
    let shared = registry.insert("/dev/ttyFAKE0", Box::new(bus));
    let poll = PollPolicy {
        interval: Duration::ZERO,
        deadline: Some(Duration::ZERO),
    };
    let driver = ElliptecDriver::with_poll_policy(shared, '2', poll).unwrap();

    let err = driver.set_absolute_position(0.0).unwrap_err();
    assert!(matches!(err, MotorError::MotionTimeout { address: '2', .. }));
}

#[test]
fn fault_status_after_move_is_a_hardware_fault() {
    let (driver, _) = scripted_driver(vec![info_resp(b'2'), gs_resp("02"), i1_resp(false)]);
    let err = driver.set_absolute_position(1.0).unwrap_err();
    match err {
        MotorError::HardwareFault { address, status } => {
            assert_eq!(address, '2');
            assert_eq!(status, DeviceStatus::Fault(FaultCode::MechanicalTimeout));
        }
        other => panic!("expected hardware fault, got {other:?}"),
    }
}

#[test]
fn nominal_status_after_move_is_a_bare_ack() {
    let (driver, _) = scripted_driver(vec![info_resp(b'2'), gs_resp("00"), i1_resp(false)]);
    let reached = driver.set_absolute_position(0.5).unwrap();
    assert_eq!(reached, 0.0);
}

#[test]
fn unexpected_reply_code_is_a_protocol_error() {
    let (driver, _) = scripted_driver(vec![
        info_resp(b'2'),
        b"2XX00000000".to_vec(),
        i1_resp(false),
    ]);
    let err = driver.set_absolute_position(0.5).unwrap_err();
    assert!(matches!(err, MotorError::Protocol { .. }));
}

#[test]
fn relative_move_returns_absolute_ground_truth() {
    // Request 5 degrees; the device lands on pulse 1991 (4.9997 deg).
    let (driver, state) = scripted_driver(vec![info_resp(b'2'), po_resp(1991), i1_resp(false)]);
    let reached = driver.move_relative(5.0f64.to_radians()).unwrap();
    assert!((reached - 5.0f64.to_radians()).abs() < PULSE_RAD);
    assert_eq!(written(&state)[1], b"2mr000007C7".to_vec());
}

#[test]
fn activity_query_parses_the_flag_byte() {
    let (driver, _) = scripted_driver(vec![info_resp(b'2'), i1_resp(true), i1_resp(false)]);
    assert!(driver.is_active().unwrap());
    assert!(!driver.is_active().unwrap());
}

#[test]
fn status_query_decodes_the_fault_table() {
    let (driver, _) = scripted_driver(vec![info_resp(b'2'), gs_resp("09")]);
    assert_eq!(
        driver.status(None).unwrap(),
        DeviceStatus::Fault(FaultCode::Busy)
    );
}

#[test]
fn position_decodes_cached_response_without_querying() {
    let (driver, state) = scripted_driver(vec![info_resp(b'2')]);
    let angle = driver.position(Some(b"2PO00000F8E")).unwrap();
    assert!((angle - 10.0f64.to_radians()).abs() < PULSE_RAD);
    // Only the construction-time info query went out.
    assert_eq!(written(&state).len(), 1);
}

#[test]
fn set_hardware_home_folds_position_into_the_offset() {
    let offset_resp = format!("2HO{:08X}", (-500i32) as u32).into_bytes();
    let (driver, state) = scripted_driver(vec![
        info_resp(b'2'),
        po_resp(1000),
        offset_resp,
        po_resp(0),
    ]);
    let pos = driver.set_hardware_home().unwrap();
    assert_eq!(pos, 0.0);

    let frames = written(&state);
    // (-500 + 1000) mod 143360 = 500 = 0x1F4.
    assert_eq!(frames[3], b"2so000001F4".to_vec());
    assert_eq!(frames[4], b"2gp".to_vec());
}

#[test]
fn get_home_offset_reads_signed_pulses() {
    let offset_resp = format!("2HO{:08X}", (-500i32) as u32).into_bytes();
    let (driver, _) = scripted_driver(vec![info_resp(b'2'), offset_resp]);
    assert_eq!(driver.get_home_offset().unwrap().0, -500);
}

// =============================================================================
// Motor frame transform over the real driver
// =============================================================================

#[test]
fn motor_with_offset_sends_hardware_frame_and_reports_logical() {
    // Offset 10 deg: goto(0) must command the hardware to 10 deg and, on a
    // 10 deg reply, report logical zero.
    let config = SystemConfig::from_toml(
        r#"
[motors.wp_a]
backend = "elliptec"
port = "/dev/ttyFAKE0"
address = "2"
offset_rad = 0.17453292519943295
"#,
    )
    .unwrap();

    let (bus, state) = scripted(vec![info_resp(b'2'), po_resp(3982), i1_resp(false)]);
    let registry = PortRegistry::new();
    registry.insert("/dev/ttyFAKE0", Box::new(bus));

    let mut motors = MotorSet::from_config(&config, &registry).unwrap();
    let motor = motors.get_mut("wp_a").unwrap();

    let logical = motor.goto(0.0).unwrap();
    assert!(logical.abs() < PULSE_RAD);
    assert!(motor.pos().abs() < PULSE_RAD);
    assert_eq!(written(&state)[1], b"2ma00000F8E".to_vec());
}

#[test]
fn motor_set_shares_one_bus_per_port() {
    let config = SystemConfig::from_toml(
        r#"
[motors.wp_a]
backend = "elliptec"
port = "/dev/ttyFAKE0"
address = "2"

[motors.wp_b]
backend = "elliptec"
port = "/dev/ttyFAKE0"
address = "3"
"#,
    )
    .unwrap();

    // BTreeMap order: wp_a ('2') is identified first, then wp_b ('3').
    let (bus, state) = scripted(vec![info_resp(b'2'), info_resp(b'3')]);
    let registry = PortRegistry::new();
    registry.insert("/dev/ttyFAKE0", Box::new(bus));

    let motors = MotorSet::from_config(&config, &registry).unwrap();
    assert_eq!(motors.len(), 2);
    assert_eq!(registry.port_count(), 1);
    assert_eq!(written(&state), vec![b"2in".to_vec(), b"3in".to_vec()]);
}

#[test]
fn home_failure_carries_the_motor_name() {
    let config = SystemConfig::from_toml(
        r#"
[motors.wp_a]
backend = "elliptec"
port = "/dev/ttyFAKE0"
address = "2"
"#,
    )
    .unwrap();

    let (bus, _) = scripted(vec![
        info_resp(b'2'),
        b"2XX00000000".to_vec(),
        i1_resp(false),
    ]);
    let registry = PortRegistry::new();
    registry.insert("/dev/ttyFAKE0", Box::new(bus));

    let mut motors = MotorSet::from_config(&config, &registry).unwrap();
    let err = motors.get_mut("wp_a").unwrap().home().unwrap_err();
    match err {
        MotorError::Homing { motor, .. } => assert_eq!(motor, "wp_a"),
        other => panic!("expected homing error, got {other:?}"),
    }
}
