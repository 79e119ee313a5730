//! Core traits for the serial capability.
//!
//! `SerialPortAdapter` abstracts a single opened port, `SerialBackend`
//! abstracts the host: enumerating candidate devices and opening them. Both
//! have real (`serialport`) and mock implementations.

use super::error::PortError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Manufacturer prefix used to pick out Arduino boards from the port list.
pub const ARDUINO_MANUFACTURER_PREFIX: &str = "Arduino";

/// Configuration parameters for a serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfiguration {
    /// Baud rate (bits per second).
    pub baud_rate: u32,

    /// Number of data bits (5, 6, 7, or 8).
    pub data_bits: DataBits,

    /// Flow control mode.
    pub flow_control: FlowControl,

    /// Parity checking mode.
    pub parity: Parity,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Read timeout. Kept short: the relay reader polls the port.
    pub timeout: Duration,
}

impl PortConfiguration {
    /// The fixed link parameters the relay always uses: 115200 8N1, no flow control.
    pub fn arduino() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout: Duration::from_millis(50),
        }
    }
}

impl Default for PortConfiguration {
    fn default() -> Self {
        Self::arduino()
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// One entry of the host's serial device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    /// USB manufacturer string, empty for non-USB ports.
    pub manufacturer: String,
}

impl SerialPortInfo {
    pub fn new(port_name: impl Into<String>, manufacturer: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            manufacturer: manufacturer.into(),
        }
    }

    pub fn is_arduino(&self) -> bool {
        self.manufacturer.starts_with(ARDUINO_MANUFACTURER_PREFIX)
    }
}

/// Trait for serial port I/O operations.
///
/// This trait abstracts over synchronous serial port operations, allowing both
/// real hardware ports and mock implementations for testing.
pub trait SerialPortAdapter: Send + std::fmt::Debug {
    /// Write bytes to the serial port.
    ///
    /// Returns the number of bytes actually written.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Read bytes from the serial port into the provided buffer.
    ///
    /// Returns the number of bytes actually read.
    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, PortError>;

    /// Discard any unread input and unsent output.
    fn clear_buffers(&mut self) -> Result<(), PortError>;

    /// Another handle on the same open port, so reads and writes can run
    /// on different threads.
    fn try_clone(&self) -> Result<Box<dyn SerialPortAdapter>, PortError>;
}

/// The host-side serial capability consumed by the relay.
pub trait SerialBackend: Send + Sync + std::fmt::Debug {
    /// Whether serial ports can be used at all on this host.
    fn is_available(&self) -> bool {
        true
    }

    /// Enumerate the serial devices currently present.
    fn available_ports(&self) -> Vec<SerialPortInfo>;

    /// Open `port_name` with the given parameters.
    fn open(
        &self,
        port_name: &str,
        config: &PortConfiguration,
    ) -> Result<Box<dyn SerialPortAdapter>, PortError>;

    /// Names of the enumerated ports whose manufacturer starts with "Arduino".
    fn arduino_ports(&self) -> Vec<String> {
        self.available_ports()
            .into_iter()
            .filter(SerialPortInfo::is_arduino)
            .map(|info| info.port_name)
            .collect()
    }
}
