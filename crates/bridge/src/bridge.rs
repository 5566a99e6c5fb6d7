//! Lifecycle coordinator for one bridged session.
//!
//! A [`BridgeSession`] owns the remote shell and the socket channel for one
//! client. It moves through a fixed sequence of states:
//!
//! ```text
//! Created → Dialing → Preparing → Running → Closing → Closed
//!              │          │
//!              └──────────┴──────────────────────────→ Closed
//! ```
//!
//! While `Running`, the output and input relays run as separate tasks. The
//! first relay to stop triggers teardown: the SSH connection is closed first,
//! which ends the output relay, and then the socket channel is closed, which
//! ends the input relay. Each relay gets a grace period before it is aborted.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tracing::Instrument;
use uuid::Uuid;

use protocol::Credentials;

use crate::config::Config;
use crate::relay::{
    run_input_relay, run_output_relay, Completion, RelayExit, RelayKind, RelayOutcome,
    RelaySettings, ResizeController,
};
use crate::session::{PtyRequest, RemoteLogin, RemoteShell, SessionError, ShellStreams, SshTarget};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Constructed, nothing dialed yet.
    Created,
    /// Connecting and authenticating.
    Dialing,
    /// Requesting the pty and starting the shell.
    Preparing,
    /// Both relays are active.
    Running,
    /// A relay stopped; transports are being closed.
    Closing,
    /// Everything is released.
    Closed,
}

/// Error returned for an illegal state change.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid session transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl SessionState {
    /// Returns whether `next` may follow `self`.
    ///
    /// States only move forward. Setup failures skip straight to `Closed`.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Dialing)
                | (Dialing, Preparing)
                | (Preparing, Running)
                | (Running, Closing)
                | (Closing, Closed)
                | (Dialing, Closed)
                | (Preparing, Closed)
        )
    }
}

/// Settings applied to every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    /// SSH port used when the client does not send one.
    pub default_port: u16,
    /// Pty requested for the login shell.
    pub pty: PtyRequest,
    pub relay: RelaySettings,
    /// Time each relay gets to stop after its transport is closed.
    pub teardown_grace: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for BridgeSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_port: config.ssh.default_port,
            pty: PtyRequest {
                term: config.ssh.term.clone(),
                geometry: config.ssh.geometry(),
            },
            relay: RelaySettings::from(&config.relay),
            teardown_grace: Duration::from_secs(config.relay.teardown_grace_secs),
        }
    }
}

/// Summary of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    pub id: Uuid,
    /// The relay whose exit started teardown.
    pub first: RelayOutcome,
    /// The other relay, if it reported before teardown finished.
    pub second: Option<RelayOutcome>,
    pub state: SessionState,
}

impl SessionReport {
    /// Returns the outcome for `kind`, if it was reported.
    pub fn outcome(&self, kind: RelayKind) -> Option<&RelayOutcome> {
        if self.first.kind == kind {
            Some(&self.first)
        } else {
            self.second.as_ref().filter(|o| o.kind == kind)
        }
    }
}

/// One client's bridged SSH session.
pub struct BridgeSession {
    id: Uuid,
    target: SshTarget,
    settings: Arc<BridgeSettings>,
    connector: Arc<dyn RemoteLogin>,
    shell: Option<Box<dyn RemoteShell>>,
    state: SessionState,
}

impl BridgeSession {
    pub fn new(
        id: Uuid,
        credentials: Credentials,
        settings: Arc<BridgeSettings>,
        connector: Arc<dyn RemoteLogin>,
    ) -> Self {
        let target = SshTarget::from_credentials(credentials, settings.default_port);
        Self {
            id,
            target,
            settings,
            connector,
            shell: None,
            state: SessionState::Created,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    fn advance(&mut self, next: SessionState) -> Result<(), InvalidTransition> {
        if !self.state.can_advance_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = ?self.state, to = ?next, "Session state change");
        self.state = next;
        Ok(())
    }

    fn force(&mut self, next: SessionState) {
        if let Err(e) = self.advance(next) {
            tracing::warn!(error = %e, "Ignoring session state change");
        }
    }

    /// Dials the remote host and starts the shell.
    ///
    /// On failure every partially opened resource is released and the
    /// session is `Closed`; the caller still owns the socket channel and
    /// is expected to notify the client.
    pub async fn establish(&mut self) -> Result<ShellStreams, SessionError> {
        self.force(SessionState::Dialing);

        let shell = match self.connector.open(&self.target).await {
            Ok(shell) => shell,
            Err(e) => {
                tracing::error!(
                    address = %self.target.address(),
                    error = %e,
                    "Cannot connect to the ssh server"
                );
                self.force(SessionState::Closed);
                return Err(e);
            }
        };
        self.force(SessionState::Preparing);
        let shell = self.shell.insert(shell);

        match shell.prepare(&self.settings.pty).await {
            Ok(streams) => Ok(streams),
            Err(e) => {
                tracing::error!(error = %e, "Cannot start remote shell");
                self.close_remote().await;
                self.force(SessionState::Closed);
                Err(e)
            }
        }
    }

    /// Runs both relays over `ws` until one stops, then tears down.
    pub async fn relay<S>(mut self, ws: WebSocketStream<S>, streams: ShellStreams) -> SessionReport
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.force(SessionState::Running);
        tracing::info!(address = %self.target.address(), "Session running");

        let (sink, stream) = ws.split();
        let (output_done, input_done, mut done_rx) = Completion::pair();
        let resize = ResizeController::new(streams.resizer, self.settings.pty.geometry);

        let output_task = tokio::spawn(
            run_output_relay(
                streams.output,
                sink,
                self.settings.relay.clone(),
                output_done,
            )
            .in_current_span(),
        );
        let input_task = tokio::spawn(
            run_input_relay(stream, streams.input, resize, input_done).in_current_span(),
        );

        // Completion handles report even when dropped.
        let first = done_rx.recv().await.unwrap_or(RelayOutcome {
            kind: RelayKind::Output,
            exit: RelayExit::Aborted,
            bytes: 0,
        });

        self.force(SessionState::Closing);
        tracing::info!(relay = %first.kind, exit = ?first.exit, "Relay stopped, closing session");

        self.close_remote().await;

        let grace = self.settings.teardown_grace;
        if let Some(mut sink) = join_within(output_task, grace, RelayKind::Output).await {
            match tokio::time::timeout(grace, sink.close()).await {
                Ok(Ok(())) => tracing::debug!("Socket channel closed"),
                Ok(Err(e)) => tracing::debug!(error = %e, "Socket channel already closed"),
                Err(_) => tracing::warn!("Socket close did not complete in time"),
            }
        }
        join_within(input_task, grace, RelayKind::Input).await;

        let second = done_rx.try_recv().ok();

        self.force(SessionState::Closed);
        SessionReport {
            id: self.id,
            first,
            second,
            state: self.state,
        }
    }

    async fn close_remote(&mut self) {
        if let Some(mut shell) = self.shell.take() {
            shell.close().await;
        }
    }
}

/// Awaits a relay task, aborting it once `grace` has passed.
async fn join_within<T>(mut handle: JoinHandle<T>, grace: Duration, kind: RelayKind) -> Option<T> {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::error!(relay = %kind, error = %e, "Relay task failed");
            None
        }
        Err(_) => {
            tracing::warn!(relay = %kind, ?grace, "Relay did not stop in time, aborting");
            handle.abort();
            None
        }
    }
}
