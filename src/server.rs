//! WebSocket server for relay clients.
//!
//! Remote clients connect here and every text message they send is fed to
//! the relay core, which forwards it to the device. The listener runs in its
//! own task and hands each upgraded socket to the core; the core registers
//! it in the [`ClientSet`], which owns the per-client task until removal.
//!
//! ```text
//! client ──ws──> listener task ──ClientAccepted──> core ──> ClientSet
//!                                                   ^           │ client task
//!                          ClientMessage/ClientClosed └──────────┘
//! ```

use crate::events::{ClientId, CoreEvent, Inbox, ServerEvent, ServerId};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        OriginalUri, State as AxumState, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

/// Errors raised while starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no async runtime available to run the server")]
    NoRuntime,

    #[error("failed to listen on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// A connected relay client.
#[derive(Debug)]
struct ClientHandle {
    url: String,
    outbound: mpsc::UnboundedSender<String>,
    task: AbortHandle,
}

/// The set of connected clients. Membership only; no ordering.
///
/// Removing a client aborts its task, which drops the socket.
#[derive(Debug, Default)]
pub struct ClientSet {
    clients: HashMap<ClientId, ClientHandle>,
}

impl ClientSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, client: ClientId) -> bool {
        self.clients.contains_key(&client)
    }

    fn insert(&mut self, client: ClientId, handle: ClientHandle) {
        self.clients.insert(client, handle);
    }

    /// Remove and release a client. Returns false if it was already gone.
    pub fn remove(&mut self, client: ClientId) -> bool {
        match self.clients.remove(&client) {
            Some(handle) => {
                handle.task.abort();
                debug!("Released client {} ({})", client, handle.url);
                true
            }
            None => false,
        }
    }

    /// Abruptly release every client.
    pub fn release_all(&mut self) -> usize {
        let released = self.clients.len();
        for (_, handle) in self.clients.drain() {
            handle.task.abort();
        }
        released
    }

    /// Queue `text` for every connected client.
    pub fn broadcast(&self, text: &str) {
        for (client, handle) in &self.clients {
            if handle.outbound.send(text.to_string()).is_err() {
                debug!("Client {} is gone; broadcast skipped", client);
            }
        }
    }
}

#[derive(Clone)]
struct AcceptContext {
    server: ServerId,
    inbox: Inbox,
}

/// One listener instance plus the clients it accepted.
#[derive(Debug)]
pub struct RelayServer {
    id: ServerId,
    port: u16,
    local_addr: Option<SocketAddr>,
    task: JoinHandle<()>,
    clients: ClientSet,
}

impl RelayServer {
    /// Start listening on all interfaces at `port` (0 picks a free port).
    ///
    /// Binding happens in the listener task once `previous` (the task of the
    /// server being replaced) has fully stopped; the outcome is reported as
    /// `Listening` or `ListenFailed` through the inbox.
    pub fn start(
        id: ServerId,
        port: u16,
        inbox: Inbox,
        previous: Option<JoinHandle<()>>,
    ) -> Result<Self, ServerError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ServerError::NoRuntime)?;
        let task = runtime.spawn(listen(id, port, inbox, previous));

        Ok(Self {
            id,
            port,
            local_addr: None,
            task,
            clients: ClientSet::new(),
        })
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    /// Bound address, once the listener reported it.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn set_local_addr(&mut self, addr: SocketAddr) {
        self.local_addr = Some(addr);
    }

    pub fn clients(&self) -> &ClientSet {
        &self.clients
    }

    /// Take ownership of an accepted socket and start serving it.
    pub fn admit(&mut self, socket: WebSocket, url: String, inbox: Inbox) -> ClientId {
        let client = ClientId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(serve_client(client, socket, rx, inbox));

        self.clients.insert(
            client,
            ClientHandle {
                url,
                outbound: tx,
                task: task.abort_handle(),
            },
        );
        client
    }

    /// Remove a client that disconnected. Double removal is a no-op.
    pub fn remove_client(&mut self, client: ClientId) -> bool {
        self.clients.remove(client)
    }

    pub fn broadcast(&self, text: &str) {
        self.clients.broadcast(text);
    }

    /// Close the listener and abruptly release every client.
    ///
    /// Returns the listener task so a successor can wait for the socket to
    /// be released before binding.
    pub fn stop(mut self) -> JoinHandle<()> {
        let released = self.clients.release_all();
        self.task.abort();
        info!(
            "Relay server on port {} stopped, {} client(s) released",
            self.port, released
        );
        self.task
    }
}

async fn listen(id: ServerId, port: u16, inbox: Inbox, previous: Option<JoinHandle<()>>) {
    if let Some(previous) = previous {
        // Aborted tasks resolve once their future (and listener) is dropped
        let _ = previous.await;
    }

    let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
        Ok(listener) => listener,
        Err(source) => {
            let err = ServerError::Bind { port, source };
            error!("{}", err);
            let _ = inbox.send(CoreEvent::Server(ServerEvent::ListenFailed {
                server: id,
                error: err.to_string(),
            }));
            return;
        }
    };

    let addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Relay server lost its listener: {}", e);
            return;
        }
    };
    let _ = inbox.send(CoreEvent::Server(ServerEvent::Listening { server: id, addr }));

    let app = Router::new()
        .fallback(upgrade_client)
        .with_state(AcceptContext { server: id, inbox });

    if let Err(e) = axum::serve(listener, app).await {
        error!("Relay server on {} failed: {}", addr, e);
    }
}

/// Upgrade any request path to a relay client connection.
async fn upgrade_client(
    ws: WebSocketUpgrade,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    AxumState(ctx): AxumState<AcceptContext>,
) -> impl IntoResponse {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost")
        .to_string();
    let url = format!("ws://{host}{uri}");

    ws.on_upgrade(move |socket| async move {
        let accepted = ServerEvent::ClientAccepted {
            server: ctx.server,
            socket,
            url,
        };
        if ctx.inbox.send(CoreEvent::Server(accepted)).is_err() {
            debug!("Relay core gone; dropping accepted client");
        }
    })
}

/// Pump one client: inbound text goes to the core, queued broadcasts go out.
async fn serve_client(
    client: ClientId,
    socket: WebSocket,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbox: Inbox,
) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let event = ServerEvent::ClientMessage {
                        client,
                        text: text.as_str().to_string(),
                    };
                    if inbox.send(CoreEvent::Server(event)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Relay client {} disconnected", client);
                    break;
                }
                Some(Ok(_)) => {
                    // Binary, ping and pong frames carry no commands
                }
                Some(Err(e)) => {
                    warn!("WebSocket error for client {}: {}", client, e);
                    break;
                }
                None => {
                    debug!("WebSocket stream ended for {}", client);
                    break;
                }
            },
            text = outbound.recv() => match text {
                Some(text) => {
                    if let Err(e) = sender.send(Message::Text(text.into())).await {
                        warn!("Failed to send to client {}: {}", client, e);
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let _ = inbox.send(CoreEvent::Server(ServerEvent::ClientClosed { client }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_without_runtime_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            RelayServer::start(ServerId(1), 0, tx, None),
            Err(ServerError::NoRuntime)
        ));
    }

    #[test]
    fn test_empty_client_set() {
        let mut clients = ClientSet::new();
        assert!(clients.is_empty());
        assert!(!clients.remove(ClientId::new()));
        assert_eq!(clients.release_all(), 0);
        clients.broadcast("ignored");
    }

    #[tokio::test]
    async fn test_client_set_removal_is_exactly_once() {
        let mut clients = ClientSet::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(std::future::pending::<()>());
        let id = ClientId::new();
        clients.insert(
            id,
            ClientHandle {
                url: "ws://localhost/".into(),
                outbound: tx,
                task: task.abort_handle(),
            },
        );

        assert!(clients.contains(id));
        assert!(clients.remove(id));
        assert!(!clients.remove(id));
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_listening_reported_with_bound_port() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let server = RelayServer::start(ServerId(3), 0, tx, None).unwrap();

        match tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await {
            Ok(Some(CoreEvent::Server(ServerEvent::Listening { server: id, addr }))) => {
                assert_eq!(id, ServerId(3));
                assert_ne!(addr.port(), 0);
            }
            other => panic!("expected Listening, got {other:?}"),
        }

        let _ = server.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure_reported() {
        let taken = std::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _server = RelayServer::start(ServerId(4), port, tx, None).unwrap();

        match tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await {
            Ok(Some(CoreEvent::Server(ServerEvent::ListenFailed { server, error }))) => {
                assert_eq!(server, ServerId(4));
                assert!(error.contains(&port.to_string()));
            }
            other => panic!("expected ListenFailed, got {other:?}"),
        }
    }
}
