//! Shared serial port management for RS-485 multidrop buses.
//!
//! Several rotation stages can hang off one physical port, distinguished
//! only by their bus address, so the registry hands out at most one open
//! channel per port path. The channel mutex is held for the duration of a
//! full command/response exchange, which is what keeps transactions from
//! different devices on the same bus from interleaving.

use crate::error::{MotorError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

/// Baud rate for the Elliptec bus.
pub const BAUD_RATE: u32 = 9600;

/// Default read timeout applied when a port is first opened.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// A byte-oriented channel a driver can exchange frames over.
///
/// Implemented for real serial ports and for in-memory fakes in tests.
pub trait BusIo: Read + Write + Send {
    /// Drop any unread bytes sitting in the receive buffer, so a response
    /// read starts from a known-clean state.
    fn discard_input(&mut self) -> std::io::Result<()>;
}

/// Boxed channel stored in the registry.
pub type DynBus = Box<dyn BusIo>;

/// A channel shared between every motor on the same physical port.
pub type SharedBus = Arc<Mutex<DynBus>>;

/// [`BusIo`] over an opened `serialport` handle.
struct SerialBus(Box<dyn serialport::SerialPort>);

impl Read for SerialBus {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for SerialBus {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl BusIo for SerialBus {
    fn discard_input(&mut self) -> std::io::Result<()> {
        self.0
            .clear(serialport::ClearBuffer::Input)
            .map_err(std::io::Error::from)
    }
}

/// Registry mapping port paths to shared open channels.
///
/// Owned by whoever wires the system together, not process-global; tests
/// build one per case and inject fake channels through [`insert`].
///
/// [`insert`]: PortRegistry::insert
pub struct PortRegistry {
    ports: Mutex<HashMap<String, SharedBus>>,
    timeout: Duration,
}

impl PortRegistry {
    /// Registry whose ports open with [`DEFAULT_TIMEOUT`].
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Registry whose ports open with a custom read timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            ports: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Get the shared channel for `port_path`, opening it on first use.
    ///
    /// Later calls for the same path return the same channel. There is no
    /// release operation; channels live as long as the registry.
    pub fn acquire(&self, port_path: &str) -> Result<SharedBus> {
        let mut ports = self.ports.lock();
        if let Some(bus) = ports.get(port_path) {
            tracing::debug!(port = port_path, "reusing shared serial port");
            return Ok(bus.clone());
        }

        // RS-485 multidrop does not use RTS/CTS flow control.
        let port = serialport::new(port_path, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(self.timeout)
            .open()
            .map_err(|source| MotorError::Connection {
                port: port_path.to_string(),
                source,
            })?;

        let bus: SharedBus = Arc::new(Mutex::new(Box::new(SerialBus(port)) as DynBus));
        ports.insert(port_path.to_string(), bus.clone());
        tracing::info!(port = port_path, timeout_ms = ?self.timeout.as_millis(), "opened shared serial port");
        Ok(bus)
    }

    /// Register an already-open channel under `port_path`.
    ///
    /// Subsequent [`acquire`] calls for that path return this channel. This
    /// is the seam tests use to stand in fake buses for real hardware.
    ///
    /// [`acquire`]: PortRegistry::acquire
    pub fn insert(&self, port_path: &str, bus: DynBus) -> SharedBus {
        let shared: SharedBus = Arc::new(Mutex::new(bus));
        self.ports
            .lock()
            .insert(port_path.to_string(), shared.clone());
        shared
    }

    /// Number of currently open shared ports.
    pub fn port_count(&self) -> usize {
        self.ports.lock().len()
    }
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}
