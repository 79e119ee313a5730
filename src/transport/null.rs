use super::{OpenOutcome, Transport, TransportError, TransportState};
use crate::state::ConnectionMode;

/// Transport for `ConnectionMode::None`: never opens, swallows everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::None
    }

    fn state(&self) -> TransportState {
        TransportState::Closed
    }

    fn open(&mut self) -> Result<OpenOutcome, TransportError> {
        Err(TransportError::NotOpen)
    }

    fn close(&mut self) -> bool {
        false
    }

    fn send(&mut self, _command: &str) -> Result<(), TransportError> {
        Ok(())
    }
}
