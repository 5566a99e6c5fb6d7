//! Socket channel server.
//!
//! Accepts TCP connections, upgrades them to WebSockets on the configured
//! path, reads the credential message and hands each client to a
//! [`BridgeSession`]. Shutdown stops the accept loop first and then gives
//! open sessions a bounded time to finish before aborting them.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use protocol::{Credentials, ProtocolError};

use crate::bridge::{BridgeSession, BridgeSettings};
use crate::config::Config;
use crate::session::RemoteLogin;

/// Message sent to the client when the credential payload is unusable.
pub const BAD_CREDENTIALS_REPLY: &str = "Cannot parse credentials";

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not serving.
    Stopped,
    /// Accepting connections.
    Running,
    /// Draining open sessions.
    ShuttingDown,
}

/// Events emitted by the server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Server state changed.
    StateChanged(ServerState),
    /// A client finished the upgrade.
    ClientConnected { session_id: Uuid, peer: SocketAddr },
    /// A client's session is fully torn down.
    SessionClosed { session_id: Uuid },
}

/// Server errors.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server is already running")]
    AlreadyRunning,
}

/// Rejected upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRejection {
    pub status: StatusCode,
    pub body: String,
}

impl HandshakeRejection {
    fn into_response(self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.body));
        *response.status_mut() = self.status;
        response
    }
}

/// Rules applied to every upgrade request.
#[derive(Debug, Clone)]
pub struct UpgradePolicy {
    path: String,
    allowed_origins: Vec<String>,
    websocket: WebSocketConfig,
}

impl UpgradePolicy {
    pub fn from_config(config: &Config) -> Self {
        let mut websocket = WebSocketConfig::default();
        websocket.write_buffer_size = config.upgrade.write_buffer_size;
        websocket.max_message_size = Some(config.upgrade.max_message_size);
        websocket.max_frame_size = Some(config.upgrade.max_message_size);

        Self {
            path: config.server.path.clone(),
            allowed_origins: config.upgrade.allowed_origins.clone(),
            websocket,
        }
    }

    /// Checks the request path and, when an allow-list is set, the origin.
    pub fn validate(&self, request: &Request) -> Result<(), HandshakeRejection> {
        if request.uri().path() != self.path {
            return Err(HandshakeRejection {
                status: StatusCode::NOT_FOUND,
                body: "Not found".to_string(),
            });
        }

        if !self.allowed_origins.is_empty() {
            let origin = request
                .headers()
                .get("Origin")
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| HandshakeRejection {
                    status: StatusCode::FORBIDDEN,
                    body: "Origin header missing".to_string(),
                })?;
            if !self.allowed_origins.iter().any(|allowed| allowed == origin) {
                return Err(HandshakeRejection {
                    status: StatusCode::FORBIDDEN,
                    body: "Origin not allowed".to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn websocket_config(&self) -> WebSocketConfig {
        self.websocket
    }
}

/// The bridge server.
pub struct BridgeServer {
    config: Config,
    policy: Arc<UpgradePolicy>,
    settings: Arc<BridgeSettings>,
    connector: Arc<dyn RemoteLogin>,
    state: Arc<RwLock<ServerState>>,
    shutdown_token: CancellationToken,
    event_tx: broadcast::Sender<ServerEvent>,
}

impl BridgeServer {
    /// Creates a server that opens remote sessions through `connector`.
    pub fn new(config: Config, connector: Arc<dyn RemoteLogin>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            policy: Arc::new(UpgradePolicy::from_config(&config)),
            settings: Arc::new(BridgeSettings::from(&config)),
            config,
            connector,
            state: Arc::new(RwLock::new(ServerState::Stopped)),
            shutdown_token: CancellationToken::new(),
            event_tx,
        }
    }

    /// Returns the current state.
    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Returns a receiver for server events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.event_tx.subscribe()
    }

    /// Returns the token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Requests a graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// Binds the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.server.listen_addr();
        TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Serves connections from `listener` until shutdown is requested.
    pub async fn run(&self, listener: TcpListener) -> Result<(), ServerError> {
        {
            let mut state = self.state.write().await;
            if *state != ServerState::Stopped {
                return Err(ServerError::AlreadyRunning);
            }
            *state = ServerState::Running;
        }
        self.emit_event(ServerEvent::StateChanged(ServerState::Running));

        if let Ok(addr) = listener.local_addr() {
            info!(%addr, path = %self.config.server.path, "Server started");
        }

        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutting down server...");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            sessions.spawn(handle_connection(
                                stream,
                                peer,
                                Arc::clone(&self.policy),
                                Arc::clone(&self.settings),
                                Arc::clone(&self.connector),
                                self.event_tx.clone(),
                            ));
                        }
                        Err(e) => warn!(error = %e, "Failed to accept connection"),
                    }
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    reap(joined);
                }
            }
        }

        drop(listener);
        self.set_state(ServerState::ShuttingDown).await;
        self.drain(sessions).await;
        self.set_state(ServerState::Stopped).await;

        info!("Server shutdown completely");
        Ok(())
    }

    /// Waits for open sessions, aborting whatever is left at the deadline.
    async fn drain(&self, mut sessions: JoinSet<()>) {
        if sessions.is_empty() {
            return;
        }

        let timeout = self.config.server.shutdown_timeout();
        info!(open = sessions.len(), ?timeout, "Waiting for open sessions");

        let wait_all = async {
            while let Some(joined) = sessions.join_next().await {
                reap(joined);
            }
        };
        if tokio::time::timeout(timeout, wait_all).await.is_err() {
            warn!(
                remaining = sessions.len(),
                "Shutdown timeout reached, aborting sessions"
            );
            sessions.shutdown().await;
        }
    }

    async fn set_state(&self, next: ServerState) {
        *self.state.write().await = next;
        self.emit_event(ServerEvent::StateChanged(next));
    }

    fn emit_event(&self, event: ServerEvent) {
        let _ = self.event_tx.send(event);
    }
}

fn reap(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Session task panicked");
        } else {
            debug!(error = %e, "Session task cancelled");
        }
    }
}

/// Handles one client from TCP accept to session teardown.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    policy: Arc<UpgradePolicy>,
    settings: Arc<BridgeSettings>,
    connector: Arc<dyn RemoteLogin>,
    event_tx: broadcast::Sender<ServerEvent>,
) {
    let session_id = Uuid::new_v4();
    let span = tracing::info_span!("bridge_session", %session_id, %peer);

    async move {
        let callback_policy = Arc::clone(&policy);
        let callback = move |request: &Request, response: Response| {
            callback_policy
                .validate(request)
                .map(|()| response)
                .map_err(|rejection| {
                    warn!(
                        status = %rejection.status,
                        uri = %request.uri(),
                        "Rejected upgrade request"
                    );
                    rejection.into_response()
                })
        };

        let mut ws = match tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            callback,
            Some(policy.websocket_config()),
        )
        .await
        {
            Ok(ws) => ws,
            Err(e) => {
                warn!(error = %e, "Cannot upgrade to websocket");
                return;
            }
        };

        info!("Client connected");
        let _ = event_tx.send(ServerEvent::ClientConnected { session_id, peer });

        let credentials = match read_credentials(&mut ws).await {
            Ok(credentials) => credentials,
            Err(e) => {
                error!(error = %e, "Cannot parse credentials");
                reject(ws, BAD_CREDENTIALS_REPLY).await;
                let _ = event_tx.send(ServerEvent::SessionClosed { session_id });
                return;
            }
        };

        let mut session = BridgeSession::new(session_id, credentials, settings, connector);
        match session.establish().await {
            Ok(streams) => {
                let report = session.relay(ws, streams).await;
                info!(
                    first = %report.first.kind,
                    state = ?report.state,
                    "Session closed"
                );
            }
            Err(e) => reject(ws, &e.to_string()).await,
        }

        let _ = event_tx.send(ServerEvent::SessionClosed { session_id });
    }
    .instrument(span)
    .await
}

/// Reads the first data-bearing message and decodes it as credentials.
async fn read_credentials<S>(ws: &mut WebSocketStream<S>) -> Result<Credentials, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => return Credentials::from_json(text.as_bytes()),
            Some(Ok(WsMessage::Binary(data))) => return Credentials::from_json(&data),
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(ProtocolError::ConnectionClosed(
                    "closed before credentials".to_string(),
                ))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ProtocolError::ConnectionClosed(e.to_string())),
        }
    }
}

/// Tells the client why its session ended and closes the socket.
async fn reject<S>(mut ws: WebSocketStream<S>, reason: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = ws.send(WsMessage::Binary(reason.as_bytes().to_vec())).await {
        debug!(error = %e, "Cannot send rejection to client");
    }
    if let Err(e) = ws.close(None).await {
        debug!(error = %e, "Socket channel already closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, origin: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(origin) = origin {
            builder = builder.header("Origin", origin);
        }
        builder.body(()).expect("request build")
    }

    fn policy(origins: &[&str]) -> UpgradePolicy {
        let mut config = Config::default();
        config.upgrade.allowed_origins = origins.iter().map(|o| o.to_string()).collect();
        UpgradePolicy::from_config(&config)
    }

    #[test]
    fn test_accepts_configured_path() {
        assert!(policy(&[]).validate(&request("/ws", None)).is_ok());
    }

    #[test]
    fn test_rejects_other_path() {
        let rejection = policy(&[]).validate(&request("/other", None)).unwrap_err();
        assert_eq!(rejection.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_any_origin_allowed_by_default() {
        let result = policy(&[]).validate(&request("/ws", Some("https://anywhere.example")));
        assert!(result.is_ok());
    }

    #[test]
    fn test_origin_allow_list() {
        let policy = policy(&["https://console.example.com"]);

        assert!(policy
            .validate(&request("/ws", Some("https://console.example.com")))
            .is_ok());

        let rejection = policy
            .validate(&request("/ws", Some("https://evil.example")))
            .unwrap_err();
        assert_eq!(rejection.status, StatusCode::FORBIDDEN);

        let rejection = policy.validate(&request("/ws", None)).unwrap_err();
        assert_eq!(rejection.body, "Origin header missing");
    }

    #[test]
    fn test_rejection_response_carries_status() {
        let response = HandshakeRejection {
            status: StatusCode::FORBIDDEN,
            body: "Origin not allowed".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.body().as_deref(), Some("Origin not allowed"));
    }

    #[test]
    fn test_websocket_config_from_upgrade_section() {
        let mut config = Config::default();
        config.upgrade.max_message_size = 4096;
        let ws = UpgradePolicy::from_config(&config).websocket_config();
        assert_eq!(ws.write_buffer_size, 512);
        assert_eq!(ws.max_message_size, Some(4096));
        assert_eq!(ws.max_frame_size, Some(4096));
    }
}
