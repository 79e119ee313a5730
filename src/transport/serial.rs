//! Serial transport.
//!
//! Opening is synchronous. Once open, a reader thread polls its own clone of
//! the port and reports each newline-terminated line as a received message,
//! so writes never wait behind a read. Commands are written with a trailing
//! carriage return.

use super::{OpenOutcome, Transport, TransportError, TransportState};
use crate::events::EventSink;
use crate::port::{PortConfiguration, SerialBackend, SerialPortAdapter};
use crate::state::ConnectionMode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause between polls when the device has nothing to say.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

const READ_BUFFER_SIZE: usize = 256;

/// Line terminator appended to every outgoing command.
const COMMAND_TERMINATOR: &str = "\r";

/// Transport over a serial port obtained from a [`SerialBackend`].
pub struct SerialTransport {
    port_name: String,
    config: PortConfiguration,
    backend: Arc<dyn SerialBackend>,
    sink: EventSink,
    writer: Option<Box<dyn SerialPortAdapter>>,
    /// Cleared by whichever side closes the link first.
    open: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialTransport {
    pub fn new(
        port_name: impl Into<String>,
        config: PortConfiguration,
        backend: Arc<dyn SerialBackend>,
        sink: EventSink,
    ) -> Self {
        Self {
            port_name: port_name.into(),
            config,
            backend,
            sink,
            writer: None,
            open: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }
}

impl Transport for SerialTransport {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Serial
    }

    fn state(&self) -> TransportState {
        if self.writer.is_some() && self.open.load(Ordering::Acquire) {
            TransportState::Open
        } else {
            TransportState::Closed
        }
    }

    fn open(&mut self) -> Result<OpenOutcome, TransportError> {
        if self.is_open() {
            return Err(TransportError::Busy(TransportState::Open));
        }
        // Reap a reader left over from a remote close
        self.close();

        let mut writer = self.backend.open(&self.port_name, &self.config)?;
        // Bytes queued before the open belong to nobody
        if let Err(e) = writer.clear_buffers() {
            debug!("Could not clear buffers of {}: {}", self.port_name, e);
        }
        let reader_port = writer.try_clone()?;

        // A fresh flag per attempt so a finished reader cannot touch this one
        let open = Arc::new(AtomicBool::new(true));
        let reader_open = Arc::clone(&open);
        let sink = self.sink.clone();
        let reader = thread::Builder::new()
            .name(format!("serial-reader-{}", self.port_name))
            .spawn(move || read_loop(reader_port, reader_open, sink))
            .map_err(|e| TransportError::Port(e.into()))?;

        info!(
            "Serial port {} opened at {} baud",
            self.port_name, self.config.baud_rate
        );
        self.writer = Some(writer);
        self.open = open;
        self.reader = Some(reader);
        Ok(OpenOutcome::Opened)
    }

    fn close(&mut self) -> bool {
        if self.writer.take().is_none() {
            return false;
        }
        let was_open = self.open.swap(false, Ordering::AcqRel);

        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Serial reader for {} panicked", self.port_name);
            }
        }

        if was_open {
            info!("Serial port {} closed", self.port_name);
        }
        was_open
    }

    fn send(&mut self, command: &str) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::NotOpen);
        }
        let writer = self.writer.as_mut().ok_or(TransportError::NotOpen)?;

        let mut framed = String::with_capacity(command.len() + COMMAND_TERMINATOR.len());
        framed.push_str(command);
        framed.push_str(COMMAND_TERMINATOR);

        let written = writer.write_bytes(framed.as_bytes())?;
        debug!("Wrote {} bytes to {}", written, self.port_name);
        Ok(())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port_name", &self.port_name)
            .field("state", &self.state())
            .finish()
    }
}

fn read_loop(mut port: Box<dyn SerialPortAdapter>, open: Arc<AtomicBool>, sink: EventSink) {
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let mut pending = Vec::new();

    while open.load(Ordering::Acquire) {
        match port.read_bytes(&mut buffer) {
            Ok(0) => thread::sleep(IDLE_BACKOFF),
            Ok(n) => {
                pending.extend_from_slice(&buffer[..n]);
                drain_lines(&mut pending, &sink);
            }
            Err(e) if e.is_idle() => thread::sleep(IDLE_BACKOFF),
            Err(e) => {
                if open.swap(false, Ordering::AcqRel) {
                    warn!("Serial link lost: {}", e);
                    sink.closed();
                }
                break;
            }
        }
    }
}

/// Emit every complete line in `pending`, leaving a partial tail behind.
fn drain_lines(pending: &mut Vec<u8>, sink: &EventSink) {
    while let Some(pos) = memchr::memchr(b'\n', pending) {
        let line: Vec<u8> = pending.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(|c| c == '\r' || c == '\n');
        if !text.is_empty() {
            sink.received(text);
        }
    }
}
