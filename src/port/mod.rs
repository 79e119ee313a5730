//! Serial capability layer.
//!
//! Provides the port adapter and host backend traits, their `serialport`
//! implementations, and mocks so the relay can be driven without hardware.

pub mod error;
pub mod mock;
pub mod sync_port;
pub mod traits;

pub use error::PortError;
pub use mock::{MockSerialBackend, MockSerialPort};
pub use sync_port::*;
pub use traits::*;
