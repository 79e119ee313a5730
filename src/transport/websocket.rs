//! WebSocket client transport.
//!
//! Opening is asynchronous: `open()` spawns a connection task and returns
//! `Pending`; the task reports `Opened` after the handshake. Text frames are
//! sent verbatim, with no terminator.

use super::{OpenOutcome, Transport, TransportError, TransportState};
use crate::events::EventSink;
use crate::state::ConnectionMode;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// State shared between the transport and its connection task. Transitions
/// and the matching sink notifications happen under this lock so the core
/// never sees them out of order.
type SharedState = Arc<Mutex<TransportState>>;

pub struct WebSocketClientTransport {
    url: String,
    sink: EventSink,
    state: SharedState,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketClientTransport {
    pub fn new(url: impl Into<String>, sink: EventSink) -> Self {
        Self {
            url: url.into(),
            sink,
            state: Arc::new(Mutex::new(TransportState::Closed)),
            outbound: None,
            task: None,
        }
    }
}

impl Transport for WebSocketClientTransport {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::WebSocket
    }

    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    fn open(&mut self) -> Result<OpenOutcome, TransportError> {
        let current = self.state();
        if current != TransportState::Closed {
            return Err(TransportError::Busy(current));
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        // A fresh cell per attempt: a task from an earlier attempt may still
        // be winding down and must not touch this one.
        let state = Arc::new(Mutex::new(TransportState::Opening));
        let (tx, rx) = mpsc::unbounded_channel();

        self.state = Arc::clone(&state);
        self.outbound = Some(tx);
        self.task = Some(runtime.spawn(run_connection(
            self.url.clone(),
            state,
            rx,
            self.sink.clone(),
        )));

        debug!("Opening WebSocket connection to {}", self.url);
        Ok(OpenOutcome::Pending)
    }

    fn close(&mut self) -> bool {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut *state, TransportState::Closed);

        // Dropping the sender asks an open connection to send a close frame
        self.outbound = None;
        let task = self.task.take();

        match previous {
            TransportState::Open => {
                self.sink.closed();
                info!("WebSocket connection to {} closed", self.url);
                true
            }
            TransportState::Opening => {
                if let Some(task) = task {
                    task.abort();
                }
                debug!("Cancelled pending WebSocket connection to {}", self.url);
                true
            }
            TransportState::Closed => false,
        }
    }

    fn send(&mut self, command: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let outbound = self.outbound.as_ref().ok_or(TransportError::NotOpen)?;
        outbound
            .send(command.to_string())
            .map_err(|_| TransportError::TaskGone)
    }
}

impl Drop for WebSocketClientTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for WebSocketClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketClientTransport")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}

async fn run_connection(
    url: String,
    state: SharedState,
    mut outbound: mpsc::UnboundedReceiver<String>,
    sink: EventSink,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            let mut state = state.lock();
            if *state == TransportState::Opening {
                *state = TransportState::Closed;
                warn!("WebSocket connection to {} failed: {}", url, e);
            }
            return;
        }
    };

    {
        let mut state = state.lock();
        if *state != TransportState::Opening {
            // Closed while the handshake was in flight
            return;
        }
        *state = TransportState::Open;
        sink.opened();
    }
    info!("WebSocket connected to {}", url);

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let state = state.lock();
                    if *state == TransportState::Open {
                        sink.received(text.as_str());
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("WebSocket peer {} sent close: {:?}", url, frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error on {}: {}", url, e);
                    break;
                }
                None => break,
            },
            command = outbound.recv() => match command {
                Some(text) => {
                    if let Err(e) = write.send(Message::text(text)).await {
                        warn!("WebSocket send to {} failed: {}", url, e);
                        break;
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
            },
        }
    }

    let mut state = state.lock();
    if *state == TransportState::Open {
        *state = TransportState::Closed;
        info!("WebSocket connection to {} closed by peer", url);
        sink.closed();
    }
}
