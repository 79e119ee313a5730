//! The relay core: connection-mode state machine and message routing.
//!
//! `RelayCore` owns the active transport (exactly one, matching the current
//! mode) and the relay's WebSocket server. All of its methods are
//! synchronous and must be called from a single execution context; the
//! asynchronous world reaches it only through [`RelayCore::handle_event`].
//!
//! Failures never surface as errors here: they are logged and show up as
//! state (`is_connected`) and as the absence of the matching event.

use crate::events::{
    ClientId, CoreEvent, EventSink, Inbox, InboxReceiver, RelayEvent, ServerEvent, ServerId,
    TransportEvent, TransportId,
};
use crate::port::{PortConfiguration, SerialBackend};
use crate::server::RelayServer;
use crate::state::{
    connection_modes, ConnectionMode, RelayOptions, RelaySettings, RelaySnapshot,
};
use crate::transport::{
    NullTransport, OpenOutcome, Transport, TransportFactory, TransportSpec, TransportState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Capacity of the outward event channel per subscriber.
const EVENT_CAPACITY: usize = 256;

pub struct RelayCore {
    settings: RelaySettings,
    options: RelayOptions,
    connected: bool,

    backend: Arc<dyn SerialBackend>,
    factory: Box<dyn TransportFactory>,
    transport: Box<dyn Transport>,
    transport_id: TransportId,
    next_transport: u64,

    server: Option<RelayServer>,
    next_server: u64,

    inbox: Inbox,
    events: broadcast::Sender<RelayEvent>,
}

impl RelayCore {
    /// Create a relay in mode `None`, disconnected, server per `settings`.
    ///
    /// Only `settings.server` is applied here; the mode, serial interface and
    /// remote URL are stored as-is and take effect on the next `connect()`.
    /// Returns the receiving half of the inbox, which the caller must drain
    /// into [`RelayCore::handle_event`].
    pub fn new(
        settings: RelaySettings,
        options: RelayOptions,
        backend: Arc<dyn SerialBackend>,
        factory: Box<dyn TransportFactory>,
    ) -> (Self, InboxReceiver) {
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut core = Self {
            settings,
            options,
            connected: false,
            backend,
            factory,
            transport: Box::new(NullTransport),
            transport_id: TransportId(0),
            next_transport: 1,
            server: None,
            next_server: 1,
            inbox,
            events,
        };
        if core.settings.server.enabled {
            core.restart_server();
        }
        (core, inbox_rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<RelayEvent> {
        self.events.clone()
    }

    // ---- getters ----

    pub fn connection_mode(&self) -> ConnectionMode {
        self.settings.mode
    }

    pub fn connection_modes(&self) -> Vec<String> {
        connection_modes(self.backend.is_available())
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn serial_interface(&self) -> &str {
        &self.settings.serial_interface
    }

    pub fn remote_url(&self) -> &str {
        &self.settings.remote_url
    }

    pub fn has_server(&self) -> bool {
        self.settings.server.enabled
    }

    pub fn server_port(&self) -> u16 {
        self.settings.server.port
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().and_then(RelayServer::local_addr)
    }

    pub fn client_count(&self) -> usize {
        self.server.as_ref().map_or(0, |s| s.clients().len())
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            connection_mode: self.settings.mode,
            connected: self.connected,
            serial_interface: self.settings.serial_interface.clone(),
            remote_url: self.settings.remote_url.clone(),
            server_enabled: self.settings.server.enabled,
            server_port: self.settings.server.port,
            server_addr: self.server_addr(),
            clients: self.client_count(),
            connection_modes: self.connection_modes(),
        }
    }

    /// Arduino ports currently attached; empty without serial support.
    pub fn serial_interfaces(&self) -> Vec<String> {
        if !self.backend.is_available() {
            return Vec::new();
        }
        self.backend.arduino_ports()
    }

    // ---- commands ----

    /// Switch modes. Unknown names select `None`; the notification echoes
    /// `requested` verbatim.
    pub fn set_connection_mode(&mut self, requested: &str) {
        self.settings.mode = ConnectionMode::normalize(requested);
        info!(
            "Connection mode set to {} (requested {:?})",
            self.settings.mode, requested
        );
        self.connect();
        self.emit(RelayEvent::ConnectionModeChanged {
            mode: requested.to_string(),
        });
    }

    /// (Re)connect using the current mode. Always closes the active
    /// transport first.
    pub fn connect(&mut self) {
        self.internal_disconnect();
        // Whatever was open is closed now
        self.set_connected(false);

        match self.settings.mode {
            ConnectionMode::None => {
                self.replace_transport(None);
            }
            ConnectionMode::Serial => self.connect_serial(),
            ConnectionMode::WebSocket => {
                let spec = TransportSpec::WebSocket {
                    url: self.settings.remote_url.clone(),
                };
                self.replace_transport(Some(spec));
                self.open_transport();
            }
        }
    }

    fn connect_serial(&mut self) {
        let interfaces = self.serial_interfaces();
        if interfaces.is_empty() {
            debug!("No Arduino serial interface found; connect abandoned");
            self.replace_transport(None);
            return;
        }

        if self.settings.serial_interface.is_empty() {
            self.settings.serial_interface = interfaces[0].clone();
            info!(
                "Selected serial interface {}",
                self.settings.serial_interface
            );
            self.emit(RelayEvent::SerialInterfaceChanged {
                interface: self.settings.serial_interface.clone(),
            });
        }

        let spec = TransportSpec::Serial {
            port_name: self.settings.serial_interface.clone(),
            config: PortConfiguration::arduino(),
        };
        self.replace_transport(Some(spec));
        self.open_transport();
    }

    /// Close the active transport if currently connected, or cancel a
    /// connection attempt that has not been reported yet. Cancelling does not
    /// notify: the state was never flipped.
    pub fn disconnect(&mut self) {
        if self.connected {
            if self.internal_disconnect() {
                self.set_connected(false);
            }
        } else if self.transport.state() != TransportState::Closed {
            debug!("Cancelling pending {} connection", self.transport.mode());
            self.transport.close();
        }
    }

    /// Close the active transport. Reports whether the close should flip the
    /// connection state right away: always for serial, for WebSocket only
    /// with `report_websocket_close` (otherwise the transport's own close
    /// notification does it).
    fn internal_disconnect(&mut self) -> bool {
        let mode = self.transport.mode();
        let closed = self.transport.close();
        closed && (mode == ConnectionMode::Serial || self.options.report_websocket_close)
    }

    /// Forward a command to the device. A no-op in mode `None`.
    pub fn send(&mut self, command: &str) {
        if self.settings.mode == ConnectionMode::None {
            return;
        }
        if let Err(e) = self.transport.send(command) {
            debug!("Dropped command {:?}: {}", command, e);
        }
    }

    pub fn set_serial_interface(&mut self, interface: &str) {
        if self.settings.serial_interface == interface {
            return;
        }
        self.settings.serial_interface = interface.to_string();

        if self.settings.mode == ConnectionMode::Serial {
            self.connect();
        }
        self.emit(RelayEvent::SerialInterfaceChanged {
            interface: interface.to_string(),
        });
    }

    pub fn set_remote_url(&mut self, url: &str) {
        if self.settings.remote_url == url {
            return;
        }
        self.settings.remote_url = url.to_string();

        if self.settings.mode == ConnectionMode::WebSocket {
            self.connect();
        }
        self.emit(RelayEvent::RemoteUrlChanged {
            url: url.to_string(),
        });
    }

    pub fn set_server_enabled(&mut self, enabled: bool) {
        if self.settings.server.enabled == enabled {
            return;
        }
        self.settings.server.enabled = enabled;
        self.restart_server();
        self.emit(RelayEvent::ServerEnabledChanged { enabled });
    }

    pub fn set_server_port(&mut self, port: u16) {
        if self.settings.server.port == port {
            return;
        }
        self.settings.server.port = port;
        self.restart_server();
        self.emit(RelayEvent::ServerPortChanged { port });
    }

    // ---- inbox ----

    pub fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::Transport { transport, event } => {
                if transport != self.transport_id {
                    debug!("Ignoring {:?} from stale transport {:?}", event, transport);
                    return;
                }
                self.on_transport_event(event);
            }
            CoreEvent::Server(event) => self.on_server_event(event),
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                // A handshake that landed before a cancel is still queued
                if self.transport.is_open() {
                    self.set_connected(true);
                } else {
                    debug!("Ignoring open of a cancelled transport");
                }
            }
            TransportEvent::Closed => self.set_connected(false),
            TransportEvent::Received(message) => {
                debug!("Device: {}", message);
                if self.options.echo_to_clients {
                    if let Some(server) = &self.server {
                        server.broadcast(&message);
                    }
                }
                self.emit(RelayEvent::MessageReceived { message });
            }
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Listening { server, addr } => {
                if let Some(current) = self.current_server(server) {
                    current.set_local_addr(addr);
                    info!("Arduino relay listening on port {}", addr.port());
                    self.emit(RelayEvent::ServerListening { port: addr.port() });
                }
            }
            ServerEvent::ListenFailed { server, error } => {
                if self.current_server(server).is_some() {
                    warn!("Relay server enabled but not listening: {}", error);
                }
            }
            ServerEvent::ClientAccepted {
                server,
                socket,
                url,
            } => {
                let inbox = self.inbox.clone();
                match self.current_server(server) {
                    Some(current) => {
                        let client = current.admit(socket, url.clone(), inbox);
                        info!("Relay client {} connected from {}", client, url);
                        self.emit(RelayEvent::ClientConnected { url });
                    }
                    None => debug!("Dropping client accepted by a stopped server"),
                }
            }
            ServerEvent::ClientMessage { client, text } => {
                if self.is_client(client) {
                    debug!("Client {} -> device: {}", client, text);
                    self.send(&text);
                } else {
                    debug!("Ignoring message from released client {}", client);
                }
            }
            ServerEvent::ClientClosed { client } => {
                if let Some(server) = self.server.as_mut() {
                    if server.remove_client(client) {
                        debug!("Relay client {} removed", client);
                    }
                }
            }
        }
    }

    // ---- internals ----

    fn set_connected(&mut self, connected: bool) {
        if self.connected == connected {
            return;
        }
        self.connected = connected;
        self.emit(if connected {
            RelayEvent::Connected
        } else {
            RelayEvent::Disconnected
        });
    }

    /// Install a fresh transport (closing and dropping the previous one).
    fn replace_transport(&mut self, spec: Option<TransportSpec>) {
        let id = TransportId(self.next_transport);
        self.next_transport += 1;

        let transport: Box<dyn Transport> = match spec {
            Some(spec) => self
                .factory
                .create(spec, EventSink::new(id, self.inbox.clone())),
            None => Box::new(NullTransport),
        };

        self.transport_id = id;
        self.transport = transport;
    }

    fn open_transport(&mut self) {
        match self.transport.open() {
            Ok(OpenOutcome::Opened) => self.set_connected(true),
            Ok(OpenOutcome::Pending) => {}
            Err(e) => warn!("Failed to open {} transport: {}", self.transport.mode(), e),
        }
    }

    fn current_server(&mut self, id: ServerId) -> Option<&mut RelayServer> {
        self.server.as_mut().filter(|s| s.id() == id)
    }

    fn is_client(&self, client: ClientId) -> bool {
        self.server
            .as_ref()
            .is_some_and(|s| s.clients().contains(client))
    }

    /// Stop the listener (releasing all clients), then listen again if enabled.
    fn restart_server(&mut self) {
        let previous = self.server.take().map(RelayServer::stop);

        if !self.settings.server.enabled {
            return;
        }

        let id = ServerId(self.next_server);
        self.next_server += 1;
        match RelayServer::start(
            id,
            self.settings.server.port,
            self.inbox.clone(),
            previous,
        ) {
            Ok(server) => self.server = Some(server),
            Err(e) => warn!("Relay server enabled but not listening: {}", e),
        }
    }

    fn emit(&self, event: RelayEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Drop for RelayCore {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            let _ = server.stop();
        }
        self.transport.close();
    }
}

impl std::fmt::Debug for RelayCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayCore")
            .field("settings", &self.settings)
            .field("connected", &self.connected)
            .field("transport", &self.transport)
            .field("server", &self.server)
            .finish()
    }
}
