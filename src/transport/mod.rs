//! Transport abstraction over the device link.
//!
//! A transport is one bidirectional text channel to the device. The relay
//! core holds exactly one behind `Box<dyn Transport>` and rebuilds it on
//! every connection attempt:
//!
//! ```text
//!            open()            opened (async for WebSocket)
//! Closed ───────────> Opening ──────────────────────────> Open
//!   ^                    │ failure / close()                │ close() / remote close
//!   └────────────────────┴──────────────────────────────────┘
//! ```
//!
//! Asynchronous progress is reported through an [`EventSink`].

mod null;
mod serial;
mod websocket;

pub use null::NullTransport;
pub use serial::SerialTransport;
pub use websocket::WebSocketClientTransport;

use crate::events::EventSink;
use crate::port::{PortConfiguration, PortError, SerialBackend};
use crate::state::ConnectionMode;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Lifecycle state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Closed,
    Opening,
    Open,
}

/// Result of a successful `open()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The channel is open now.
    Opened,
    /// The channel is opening; an `Opened` event follows on success.
    Pending,
}

/// Errors raised by transports.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,

    #[error("transport is already {0:?}")]
    Busy(TransportState),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("no async runtime available to drive the connection")]
    NoRuntime,

    #[error("connection task has stopped")]
    TaskGone,
}

/// A single text-command channel to the device.
pub trait Transport: Send + fmt::Debug {
    /// The connection mode this transport implements.
    fn mode(&self) -> ConnectionMode;

    fn state(&self) -> TransportState;

    fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Start opening the channel.
    fn open(&mut self) -> Result<OpenOutcome, TransportError>;

    /// Close the channel. Returns true if it was opening or open; closing a
    /// closed transport is a no-op returning false.
    fn close(&mut self) -> bool;

    /// Send one command. Framing is the transport's concern.
    fn send(&mut self, command: &str) -> Result<(), TransportError>;
}

/// Everything needed to build a transport for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    Serial {
        port_name: String,
        config: PortConfiguration,
    },
    WebSocket {
        url: String,
    },
}

impl TransportSpec {
    pub fn mode(&self) -> ConnectionMode {
        match self {
            Self::Serial { .. } => ConnectionMode::Serial,
            Self::WebSocket { .. } => ConnectionMode::WebSocket,
        }
    }
}

/// Builds transports for the relay core.
pub trait TransportFactory: Send + fmt::Debug {
    fn create(&self, spec: TransportSpec, sink: EventSink) -> Box<dyn Transport>;
}

/// Factory building the real serial and WebSocket client transports.
#[derive(Debug, Clone)]
pub struct DefaultTransportFactory {
    backend: Arc<dyn SerialBackend>,
}

impl DefaultTransportFactory {
    pub fn new(backend: Arc<dyn SerialBackend>) -> Self {
        Self { backend }
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, spec: TransportSpec, sink: EventSink) -> Box<dyn Transport> {
        match spec {
            TransportSpec::Serial { port_name, config } => Box::new(SerialTransport::new(
                port_name,
                config,
                Arc::clone(&self.backend),
                sink,
            )),
            TransportSpec::WebSocket { url } => Box::new(WebSocketClientTransport::new(url, sink)),
        }
    }
}
