//! Remote session abstractions.
//!
//! A remote session is opened in two steps. [`RemoteLogin::open`] dials the
//! host and authenticates; [`RemoteShell::prepare`] then requests a pty and
//! starts the login shell, handing back the three capabilities the relays
//! need: an output reader, an input writer and a pty resizer.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;

use protocol::{Credentials, Password, TerminalGeometry};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::join_host_port;

/// Boxed future returned by the session traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors that can occur while opening or driving a remote session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// TCP connect, SSH handshake or authentication failed.
    #[error("failed to dial {address}: {reason}")]
    DialFailed { address: String, reason: String },

    /// The server refused to open a session channel.
    #[error("failed to open session channel: {0}")]
    SessionFailed(String),

    /// The server refused the pty request.
    #[error("failed to request pty: {0}")]
    PtyFailed(String),

    /// The server refused to start the login shell.
    #[error("failed to start shell: {0}")]
    ShellFailed(String),

    /// A window-change request could not be delivered.
    #[error("failed to resize pty: {0}")]
    ResizeFailed(String),
}

impl SessionError {
    pub(crate) fn dial(target: &SshTarget, reason: impl fmt::Display) -> Self {
        SessionError::DialFailed {
            address: target.address(),
            reason: reason.to_string(),
        }
    }
}

/// Where and as whom to log in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Password,
}

impl SshTarget {
    /// Builds a target from client credentials, filling in the port.
    pub fn from_credentials(credentials: Credentials, default_port: u16) -> Self {
        let port = credentials.port_or(default_port);
        Self {
            host: credentials.ip,
            port,
            username: credentials.username,
            password: credentials.password,
        }
    }

    /// Returns `host:port`.
    pub fn address(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

/// Parameters of the pty requested for the login shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub geometry: TerminalGeometry,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: "xterm".to_string(),
            geometry: TerminalGeometry::default(),
        }
    }
}

/// Byte source for the shell's combined output.
///
/// `Ok(0)` means the stream has ended.
pub trait ShellOutput: Send {
    fn read_output<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>>;
}

/// Byte sink for the shell's input.
pub trait ShellInput: Send {
    /// Writes every byte of `data`, in order.
    fn write_input<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>>;
}

impl<R> ShellOutput for R
where
    R: AsyncRead + Send + Unpin,
{
    fn read_output<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, io::Result<usize>> {
        Box::pin(AsyncReadExt::read(self, buf))
    }
}

impl<W> ShellInput for W
where
    W: AsyncWrite + Send + Unpin,
{
    fn write_input<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            AsyncWriteExt::write_all(self, data).await?;
            self.flush().await
        })
    }
}

/// Applies window-change requests to a live pty.
pub trait PtyResize: Send + Sync {
    fn resize(&self, geometry: TerminalGeometry) -> BoxFuture<'_, Result<(), SessionError>>;
}

/// Capabilities of a running shell, handed to the relays.
pub struct ShellStreams {
    pub output: Box<dyn ShellOutput>,
    pub input: Box<dyn ShellInput>,
    pub resizer: Box<dyn PtyResize>,
}

impl fmt::Debug for ShellStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellStreams").finish_non_exhaustive()
    }
}

/// Dials and authenticates against a remote host.
pub trait RemoteLogin: Send + Sync {
    fn open<'a>(
        &'a self,
        target: &'a SshTarget,
    ) -> BoxFuture<'a, Result<Box<dyn RemoteShell>, SessionError>>;
}

/// An authenticated connection that can start one interactive shell.
pub trait RemoteShell: Send {
    /// Opens a session channel, requests a pty and starts the login shell.
    fn prepare<'a>(
        &'a mut self,
        pty: &'a PtyRequest,
    ) -> BoxFuture<'a, Result<ShellStreams, SessionError>>;

    /// Closes the connection. Safe to call more than once.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}
