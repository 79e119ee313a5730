//! Service layer: runs a [`RelayCore`] in a single task.
//!
//! The core is synchronous and owned by exactly one tokio task. Front ends
//! (the console, tests, an embedding UI) drive it through a cloneable
//! [`RelayHandle`], and observe it by subscribing to [`RelayEvent`]s.
//!
//! # Architecture
//!
//! ```text
//! RelayHandle ──commands──┐
//!                         ├──> RelayService task ──> RelayCore
//! transports / server ────┘          (one event at a time)
//!         (inbox)
//! ```

use crate::error::{RelayError, RelayResult};
use crate::events::{InboxReceiver, RelayEvent};
use crate::port::SerialBackend;
use crate::relay::RelayCore;
use crate::state::{RelayOptions, RelaySettings, RelaySnapshot};
use crate::transport::{DefaultTransportFactory, TransportFactory};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

/// Depth of the command queue between handles and the service task.
const COMMAND_QUEUE_DEPTH: usize = 64;

/// A request from a handle to the service task.
#[derive(Debug)]
pub enum RelayCommand {
    SetConnectionMode(String),
    Connect,
    Disconnect,
    Send(String),
    SetSerialInterface(String),
    SetRemoteUrl(String),
    SetServerEnabled(bool),
    SetServerPort(u16),
    SerialInterfaces(oneshot::Sender<Vec<String>>),
    Snapshot(oneshot::Sender<RelaySnapshot>),
    Shutdown,
}

/// Owns the relay core and processes commands and inbox events in order.
#[derive(Debug)]
pub struct RelayService {
    core: RelayCore,
    inbox: InboxReceiver,
    commands: mpsc::Receiver<RelayCommand>,
}

impl RelayService {
    /// Build a service with the real serial and WebSocket transports.
    pub fn new(
        settings: RelaySettings,
        options: RelayOptions,
        backend: Arc<dyn SerialBackend>,
    ) -> (Self, RelayHandle) {
        let factory = DefaultTransportFactory::new(Arc::clone(&backend));
        Self::with_factory(settings, options, backend, Box::new(factory))
    }

    /// Build a service with a custom transport factory.
    pub fn with_factory(
        settings: RelaySettings,
        options: RelayOptions,
        backend: Arc<dyn SerialBackend>,
        factory: Box<dyn TransportFactory>,
    ) -> (Self, RelayHandle) {
        let (core, inbox) = RelayCore::new(settings, options, backend, factory);
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let handle = RelayHandle {
            commands: tx,
            events: core.event_sender(),
        };
        (
            Self {
                core,
                inbox,
                commands: rx,
            },
            handle,
        )
    }

    /// Process commands and events until shut down or every handle is dropped.
    /// All owned resources are released on return.
    pub async fn run(mut self) {
        info!("Relay service started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(RelayCommand::Shutdown) | None => break,
                    Some(command) => self.apply(command),
                },
                Some(event) = self.inbox.recv() => self.core.handle_event(event),
            }
        }
        info!("Relay service stopped");
    }

    fn apply(&mut self, command: RelayCommand) {
        debug!("Command: {:?}", command);
        match command {
            RelayCommand::SetConnectionMode(mode) => self.core.set_connection_mode(&mode),
            RelayCommand::Connect => self.core.connect(),
            RelayCommand::Disconnect => self.core.disconnect(),
            RelayCommand::Send(text) => self.core.send(&text),
            RelayCommand::SetSerialInterface(name) => self.core.set_serial_interface(&name),
            RelayCommand::SetRemoteUrl(url) => self.core.set_remote_url(&url),
            RelayCommand::SetServerEnabled(enabled) => self.core.set_server_enabled(enabled),
            RelayCommand::SetServerPort(port) => self.core.set_server_port(port),
            RelayCommand::SerialInterfaces(reply) => {
                let _ = reply.send(self.core.serial_interfaces());
            }
            RelayCommand::Snapshot(reply) => {
                let _ = reply.send(self.core.snapshot());
            }
            RelayCommand::Shutdown => {}
        }
    }
}

/// The command surface of a running relay.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    commands: mpsc::Sender<RelayCommand>,
    events: broadcast::Sender<RelayEvent>,
}

impl RelayHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    pub async fn set_connection_mode(&self, mode: impl Into<String>) -> RelayResult<()> {
        self.command(RelayCommand::SetConnectionMode(mode.into()))
            .await
    }

    pub async fn connect(&self) -> RelayResult<()> {
        self.command(RelayCommand::Connect).await
    }

    pub async fn disconnect(&self) -> RelayResult<()> {
        self.command(RelayCommand::Disconnect).await
    }

    pub async fn send(&self, text: impl Into<String>) -> RelayResult<()> {
        self.command(RelayCommand::Send(text.into())).await
    }

    pub async fn set_serial_interface(&self, name: impl Into<String>) -> RelayResult<()> {
        self.command(RelayCommand::SetSerialInterface(name.into()))
            .await
    }

    pub async fn set_remote_url(&self, url: impl Into<String>) -> RelayResult<()> {
        self.command(RelayCommand::SetRemoteUrl(url.into())).await
    }

    pub async fn set_server_enabled(&self, enabled: bool) -> RelayResult<()> {
        self.command(RelayCommand::SetServerEnabled(enabled)).await
    }

    pub async fn set_server_port(&self, port: u16) -> RelayResult<()> {
        self.command(RelayCommand::SetServerPort(port)).await
    }

    pub async fn serial_interfaces(&self) -> RelayResult<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        self.command(RelayCommand::SerialInterfaces(tx)).await?;
        rx.await.map_err(|_| RelayError::ServiceStopped)
    }

    pub async fn snapshot(&self) -> RelayResult<RelaySnapshot> {
        let (tx, rx) = oneshot::channel();
        self.command(RelayCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| RelayError::ServiceStopped)
    }

    pub async fn is_connected(&self) -> RelayResult<bool> {
        Ok(self.snapshot().await?.connected)
    }

    /// Ask the service to stop; resources are released when it returns.
    pub async fn shutdown(&self) -> RelayResult<()> {
        self.command(RelayCommand::Shutdown).await
    }

    async fn command(&self, command: RelayCommand) -> RelayResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RelayError::ServiceStopped)
    }
}
