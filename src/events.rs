//! Events flowing out of, and into, the relay core.
//!
//! `RelayEvent` is what subscribers (UI, automation, the console) observe.
//! `CoreEvent` is the core's inbox: everything transports and the server
//! report from their helper tasks, processed in arrival order.

use axum::extract::ws::WebSocket;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Notifications published by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RelayEvent {
    Connected,
    Disconnected,
    SerialInterfaceChanged { interface: String },
    /// Echoes the caller's raw input, not the normalized mode.
    ConnectionModeChanged { mode: String },
    RemoteUrlChanged { url: String },
    ServerEnabledChanged { enabled: bool },
    ServerPortChanged { port: u16 },
    ServerListening { port: u16 },
    MessageReceived { message: String },
    ClientConnected { url: String },
}

/// Identity of one transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(pub u64);

/// Identity of one server listener instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerId(pub u64);

/// Identity of one accepted client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a transport reports asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Closed,
    Received(String),
}

/// What the server and its clients report asynchronously.
pub enum ServerEvent {
    Listening {
        server: ServerId,
        addr: SocketAddr,
    },
    ListenFailed {
        server: ServerId,
        error: String,
    },
    ClientAccepted {
        server: ServerId,
        socket: WebSocket,
        url: String,
    },
    ClientMessage {
        client: ClientId,
        text: String,
    },
    ClientClosed {
        client: ClientId,
    },
}

impl fmt::Debug for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listening { server, addr } => f
                .debug_struct("Listening")
                .field("server", server)
                .field("addr", addr)
                .finish(),
            Self::ListenFailed { server, error } => f
                .debug_struct("ListenFailed")
                .field("server", server)
                .field("error", error)
                .finish(),
            Self::ClientAccepted { server, url, .. } => f
                .debug_struct("ClientAccepted")
                .field("server", server)
                .field("url", url)
                .finish_non_exhaustive(),
            Self::ClientMessage { client, text } => f
                .debug_struct("ClientMessage")
                .field("client", client)
                .field("text", text)
                .finish(),
            Self::ClientClosed { client } => f
                .debug_struct("ClientClosed")
                .field("client", client)
                .finish(),
        }
    }
}

/// One entry of the core's inbox.
#[derive(Debug)]
pub enum CoreEvent {
    Transport {
        transport: TransportId,
        event: TransportEvent,
    },
    Server(ServerEvent),
}

/// Sending half of the core's inbox.
pub type Inbox = mpsc::UnboundedSender<CoreEvent>;

/// Receiving half of the core's inbox.
pub type InboxReceiver = mpsc::UnboundedReceiver<CoreEvent>;

/// Handle a transport uses to report into the core's inbox.
///
/// Sends after the core is gone are silently dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    transport: TransportId,
    inbox: Inbox,
}

impl EventSink {
    pub fn new(transport: TransportId, inbox: Inbox) -> Self {
        Self { transport, inbox }
    }

    pub fn transport(&self) -> TransportId {
        self.transport
    }

    pub fn opened(&self) {
        self.emit(TransportEvent::Opened);
    }

    pub fn closed(&self) {
        self.emit(TransportEvent::Closed);
    }

    pub fn received(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Received(text.into()));
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.inbox.send(CoreEvent::Transport {
            transport: self.transport,
            event,
        });
    }
}
