//! Shared test utilities for arduino-relay tests.
//!
//! This module provides common test infrastructure including:
//! - A recording transport factory that logs every transport call
//! - Helpers to pump the core's inbox without a service task
//! - Event collectors for the outward notification channel

#![allow(dead_code)]

use arduino_relay::events::{EventSink, InboxReceiver, RelayEvent};
use arduino_relay::port::{MockSerialBackend, SerialBackend};
use arduino_relay::relay::RelayCore;
use arduino_relay::state::{ConnectionMode, RelayOptions, RelaySettings};
use arduino_relay::transport::{
    OpenOutcome, Transport, TransportError, TransportFactory, TransportSpec, TransportState,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// One observed transport call. `usize` is the creation index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(usize, ConnectionMode),
    Open(usize),
    /// Carries what `close()` returned
    Close(usize, bool),
    Send(usize, String),
}

#[derive(Debug, Default)]
struct FactoryState {
    calls: Vec<Call>,
    created: Vec<(EventSink, Arc<Mutex<TransportState>>)>,
    fail_open: bool,
}

/// Transport factory whose transports only record what they are asked to do.
///
/// Serial transports open synchronously. WebSocket transports stay `Opening`
/// until [`RecordingFactory::complete_open`], and report a `Closed` event
/// when closed while open, like the real client transport.
#[derive(Debug, Clone, Default)]
pub struct RecordingFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn created(&self) -> usize {
        self.state.lock().created.len()
    }

    /// Commands sent through any transport, in order.
    pub fn sent(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send(_, text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Finish the handshake of a pending WebSocket transport. Does nothing
    /// once the attempt was closed, like an aborted connection task.
    pub fn complete_open(&self, index: usize) {
        let state = self.state.lock();
        let (sink, transport_state) = &state.created[index];
        let mut transport_state = transport_state.lock();
        if *transport_state == TransportState::Opening {
            *transport_state = TransportState::Open;
            sink.opened();
        }
    }

    /// The device behind transport `index` reports a line.
    pub fn device_says(&self, index: usize, text: &str) {
        self.state.lock().created[index].0.received(text);
    }

    /// The link behind transport `index` drops on the remote side.
    pub fn remote_close(&self, index: usize) {
        let state = self.state.lock();
        let (sink, transport_state) = &state.created[index];
        *transport_state.lock() = TransportState::Closed;
        sink.closed();
    }
}

impl TransportFactory for RecordingFactory {
    fn create(&self, spec: TransportSpec, sink: EventSink) -> Box<dyn Transport> {
        let mut state = self.state.lock();
        let index = state.created.len();
        let mode = spec.mode();
        let transport_state = Arc::new(Mutex::new(TransportState::Closed));

        state.calls.push(Call::Create(index, mode));
        state
            .created
            .push((sink.clone(), Arc::clone(&transport_state)));

        Box::new(RecordingTransport {
            index,
            mode,
            sink,
            state: transport_state,
            factory: Arc::clone(&self.state),
        })
    }
}

#[derive(Debug)]
struct RecordingTransport {
    index: usize,
    mode: ConnectionMode,
    sink: EventSink,
    state: Arc<Mutex<TransportState>>,
    factory: Arc<Mutex<FactoryState>>,
}

impl RecordingTransport {
    fn record(&self, call: Call) {
        self.factory.lock().calls.push(call);
    }
}

impl Transport for RecordingTransport {
    fn mode(&self) -> ConnectionMode {
        self.mode
    }

    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    fn open(&mut self) -> Result<OpenOutcome, TransportError> {
        self.record(Call::Open(self.index));
        if self.factory.lock().fail_open {
            return Err(TransportError::NotOpen);
        }
        let mut state = self.state.lock();
        if self.mode == ConnectionMode::Serial {
            *state = TransportState::Open;
            Ok(OpenOutcome::Opened)
        } else {
            *state = TransportState::Opening;
            Ok(OpenOutcome::Pending)
        }
    }

    fn close(&mut self) -> bool {
        let previous = std::mem::replace(&mut *self.state.lock(), TransportState::Closed);
        let was_active = previous != TransportState::Closed;
        self.record(Call::Close(self.index, was_active));

        if previous == TransportState::Open && self.mode == ConnectionMode::WebSocket {
            self.sink.closed();
        }
        was_active
    }

    fn send(&mut self, command: &str) -> Result<(), TransportError> {
        self.record(Call::Send(self.index, command.to_string()));
        Ok(())
    }
}

/// A core driven synchronously by the test itself.
pub struct Harness {
    pub core: RelayCore,
    pub inbox: InboxReceiver,
    pub events: broadcast::Receiver<RelayEvent>,
    pub factory: RecordingFactory,
    pub backend: MockSerialBackend,
}

impl Harness {
    pub fn new(backend: MockSerialBackend) -> Self {
        Self::with_options(backend, RelayOptions::default())
    }

    pub fn with_options(backend: MockSerialBackend, options: RelayOptions) -> Self {
        let factory = RecordingFactory::new();
        let shared: Arc<dyn SerialBackend> = Arc::new(backend.clone());
        let (core, inbox) = RelayCore::new(
            RelaySettings::default(),
            options,
            shared,
            Box::new(factory.clone()),
        );
        let events = core.subscribe();

        Self {
            core,
            inbox,
            events,
            factory,
            backend,
        }
    }

    /// Process everything waiting in the inbox.
    pub fn pump(&mut self) {
        while let Ok(event) = self.inbox.try_recv() {
            self.core.handle_event(event);
        }
    }

    /// Events published since the last call.
    pub fn take_events(&mut self) -> Vec<RelayEvent> {
        drain_events(&mut self.events)
    }
}

pub fn drain_events(rx: &mut broadcast::Receiver<RelayEvent>) -> Vec<RelayEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait for the first event matching `pick`, skipping others.
pub async fn wait_for_event<T>(
    rx: &mut broadcast::Receiver<RelayEvent>,
    mut pick: impl FnMut(&RelayEvent) -> Option<T>,
) -> T {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(&event) {
                        return found;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;
    found.expect("timed out waiting for relay event")
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
