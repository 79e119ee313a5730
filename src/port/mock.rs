//! Mock serial port and backend for testing.
//!
//! `MockSerialPort` simulates a device without hardware: queued reads, a log
//! of writes, simulated timeouts and unplugging. `MockSerialBackend` is a fake
//! host that lists a configurable set of devices and hands out mock ports
//! sharing state with the handles tests keep.

use super::error::PortError;
use super::traits::{PortConfiguration, SerialBackend, SerialPortAdapter, SerialPortInfo};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Inner state of the mock port.
#[derive(Debug, Default)]
struct MockPortState {
    /// Queue of bytes to be returned by read operations.
    read_queue: VecDeque<u8>,
    /// Log of all bytes written to the port.
    write_log: Vec<Vec<u8>>,
    /// Whether the next operation should time out.
    should_timeout: bool,
    /// Simulates the device being unplugged: every read and write fails.
    unplugged: bool,
    timeout: Duration,
    /// How long each read blocks before looking at the queue.
    read_latency: Duration,
    buffers_cleared: bool,
}

/// Mock serial port implementation for testing.
///
/// # Example
/// ```
/// use arduino_relay::port::{MockSerialPort, SerialPortAdapter};
///
/// let mut port = MockSerialPort::new("MOCK0");
/// port.enqueue_read(b"READY\r\n");
///
/// let mut buffer = [0u8; 16];
/// let n = port.read_bytes(&mut buffer).unwrap();
/// assert_eq!(&buffer[..n], b"READY\r\n");
///
/// port.write_bytes(b"LED_ON\r").unwrap();
/// assert_eq!(port.get_write_log(), vec![b"LED_ON\r".to_vec()]);
/// ```
#[derive(Clone)]
pub struct MockSerialPort {
    name: String,
    state: Arc<Mutex<MockPortState>>,
}

impl MockSerialPort {
    /// Create a new mock serial port with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockPortState {
                timeout: Duration::from_millis(50),
                ..Default::default()
            })),
        }
    }

    /// Enqueue bytes to be returned by subsequent read operations.
    pub fn enqueue_read(&self, data: &[u8]) {
        self.state.lock().read_queue.extend(data);
    }

    /// Get a copy of all data written to the port.
    pub fn get_write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// Set whether the next read/write operation should time out.
    pub fn set_should_timeout(&self, should_timeout: bool) {
        self.state.lock().should_timeout = should_timeout;
    }

    /// Make every read block for `latency`, like a real port waiting out its
    /// read timeout.
    pub fn set_read_latency(&self, latency: Duration) {
        self.state.lock().read_latency = latency;
    }

    /// Simulate unplugging (or re-plugging) the device.
    pub fn set_unplugged(&self, unplugged: bool) {
        self.state.lock().unplugged = unplugged;
    }

    /// Whether `clear_buffers` has been called on any handle.
    pub fn was_cleared(&self) -> bool {
        self.state.lock().buffers_cleared
    }

    /// Get the number of bytes available to read.
    pub fn available_bytes(&self) -> usize {
        self.state.lock().read_queue.len()
    }
}

fn unplugged_error() -> PortError {
    PortError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "device unplugged",
    ))
}

impl SerialPortAdapter for MockSerialPort {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError> {
        let mut state = self.state.lock();

        if state.unplugged {
            return Err(unplugged_error());
        }
        if state.should_timeout {
            state.should_timeout = false;
            return Err(PortError::timeout(state.timeout));
        }

        state.write_log.push(data.to_vec());
        Ok(data.len())
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let latency = self.state.lock().read_latency;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        let mut state = self.state.lock();

        if state.unplugged {
            return Err(unplugged_error());
        }
        if state.should_timeout {
            state.should_timeout = false;
            return Err(PortError::timeout(state.timeout));
        }

        let mut bytes_read = 0;
        for byte in buffer.iter_mut() {
            match state.read_queue.pop_front() {
                Some(queued) => {
                    *byte = queued;
                    bytes_read += 1;
                }
                None => break,
            }
        }

        if bytes_read == 0 {
            // Same shape as a real port's read timeout
            Err(PortError::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "No data available",
            )))
        } else {
            Ok(bytes_read)
        }
    }

    fn clear_buffers(&mut self) -> Result<(), PortError> {
        let mut state = self.state.lock();
        state.read_queue.clear();
        state.buffers_cleared = true;
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn SerialPortAdapter>, PortError> {
        Ok(Box::new(self.clone()))
    }
}

impl std::fmt::Debug for MockSerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSerialPort")
            .field("name", &self.name)
            .field("available_bytes", &self.available_bytes())
            .finish()
    }
}

#[derive(Debug, Default)]
struct MockBackendState {
    listed: Vec<SerialPortInfo>,
    ports: HashMap<String, MockSerialPort>,
    open_log: Vec<(String, PortConfiguration)>,
    fail_open: bool,
    unavailable: bool,
}

/// Fake host serial capability.
///
/// Every listed device gets a `MockSerialPort`; `open` returns a clone that
/// shares state with the one returned by [`MockSerialBackend::port`].
#[derive(Debug, Clone, Default)]
pub struct MockSerialBackend {
    state: Arc<Mutex<MockBackendState>>,
}

impl MockSerialBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend listing a single Arduino at `port_name`.
    pub fn with_arduino(port_name: &str) -> Self {
        let backend = Self::new();
        backend.add_port(port_name, "Arduino (www.arduino.cc)");
        backend
    }

    /// Add a device to the enumerated list.
    pub fn add_port(&self, port_name: &str, manufacturer: &str) -> MockSerialPort {
        let mut state = self.state.lock();
        state
            .listed
            .push(SerialPortInfo::new(port_name, manufacturer));
        state
            .ports
            .entry(port_name.to_string())
            .or_insert_with(|| MockSerialPort::new(port_name))
            .clone()
    }

    /// Handle to the mock behind `port_name`, if it was ever added.
    pub fn port(&self, port_name: &str) -> Option<MockSerialPort> {
        self.state.lock().ports.get(port_name).cloned()
    }

    /// Make every subsequent `open` fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Pretend the host has no serial support.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Every `(port_name, configuration)` passed to `open`, in call order.
    pub fn open_log(&self) -> Vec<(String, PortConfiguration)> {
        self.state.lock().open_log.clone()
    }
}

impl SerialBackend for MockSerialBackend {
    fn is_available(&self) -> bool {
        !self.state.lock().unavailable
    }

    fn available_ports(&self) -> Vec<SerialPortInfo> {
        let state = self.state.lock();
        if state.unavailable {
            return Vec::new();
        }
        state.listed.clone()
    }

    fn open(
        &self,
        port_name: &str,
        config: &PortConfiguration,
    ) -> Result<Box<dyn SerialPortAdapter>, PortError> {
        let mut state = self.state.lock();
        state
            .open_log
            .push((port_name.to_string(), config.clone()));

        if state.unavailable {
            return Err(PortError::Unsupported);
        }
        if state.fail_open {
            return Err(PortError::config(format!("refusing to open {port_name}")));
        }

        match state.ports.get(port_name) {
            Some(port) => Ok(Box::new(port.clone())),
            None => Err(PortError::not_found(port_name)),
        }
    }
}
