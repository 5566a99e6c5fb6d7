//! SSH implementation of the remote session traits, backed by `russh`.

use std::sync::Arc;
use std::time::Duration;

use protocol::TerminalGeometry;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, ChannelReadHalf, ChannelWriteHalf, Disconnect, Pty};

use super::remote::{
    BoxFuture, PtyRequest, PtyResize, RemoteLogin, RemoteShell, SessionError, ShellInput,
    ShellOutput, ShellStreams, SshTarget,
};
use crate::config::SshConfig;

/// Terminal modes sent with every pty request.
const TERMINAL_MODES: &[(Pty, u32)] = &[
    (Pty::ECHO, 1),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];

/// Client handler that accepts every server host key.
///
/// Host keys are not verified. Any server presenting any key is trusted.
struct AcceptAnyHostKey;

impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!("Accepting server host key without verification");
        Ok(true)
    }
}

/// Opens password-authenticated SSH connections.
pub struct SshConnector {
    config: Arc<client::Config>,
    connect_timeout: Duration,
}

impl SshConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            config: Arc::new(client::Config::default()),
            connect_timeout,
        }
    }

    pub fn from_config(config: &SshConfig) -> Self {
        Self::new(config.connect_timeout())
    }

    async fn dial(&self, target: &SshTarget) -> Result<Handle<AcceptAnyHostKey>, SessionError> {
        tracing::debug!(address = %target.address(), "Dialing ssh server");

        tokio::time::timeout(self.connect_timeout, self.login(target))
            .await
            .map_err(|_| {
                SessionError::dial(
                    target,
                    format!("timed out after {:?}", self.connect_timeout),
                )
            })?
    }

    async fn login(&self, target: &SshTarget) -> Result<Handle<AcceptAnyHostKey>, SessionError> {
        let mut handle = client::connect(
            Arc::clone(&self.config),
            (target.host.as_str(), target.port),
            AcceptAnyHostKey,
        )
        .await
        .map_err(|e| SessionError::dial(target, e))?;

        let auth = handle
            .authenticate_password(target.username.clone(), target.password.expose_secret())
            .await
            .map_err(|e| SessionError::dial(target, e))?;

        if !auth.success() {
            disconnect(&handle).await;
            return Err(SessionError::dial(
                target,
                format!("password authentication rejected for {}", target.username),
            ));
        }

        Ok(handle)
    }
}

impl RemoteLogin for SshConnector {
    fn open<'a>(
        &'a self,
        target: &'a SshTarget,
    ) -> BoxFuture<'a, Result<Box<dyn RemoteShell>, SessionError>> {
        Box::pin(async move {
            let handle = self.dial(target).await?;
            tracing::info!(
                address = %target.address(),
                user = %target.username,
                "SSH connection established"
            );
            Ok(Box::new(SshShell {
                handle: Some(handle),
            }) as Box<dyn RemoteShell>)
        })
    }
}

/// An authenticated SSH connection.
pub struct SshShell {
    handle: Option<Handle<AcceptAnyHostKey>>,
}

impl SshShell {
    async fn start(&self, pty: &PtyRequest) -> Result<ShellStreams, SessionError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| SessionError::SessionFailed("connection already closed".to_string()))?;

        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SessionError::SessionFailed(e.to_string()))?;

        channel
            .request_pty(
                true,
                &pty.term,
                pty.geometry.cols,
                pty.geometry.rows,
                0,
                0,
                TERMINAL_MODES,
            )
            .await
            .map_err(|e| SessionError::PtyFailed(e.to_string()))?;
        await_reply(&mut channel)
            .await
            .map_err(SessionError::PtyFailed)?;

        channel
            .request_shell(true)
            .await
            .map_err(|e| SessionError::ShellFailed(e.to_string()))?;
        await_reply(&mut channel)
            .await
            .map_err(SessionError::ShellFailed)?;

        let (read_half, write_half) = channel.split();
        let write_half = Arc::new(write_half);

        Ok(ShellStreams {
            output: Box::new(ChannelOutput {
                half: read_half,
                pending: Vec::new(),
                offset: 0,
            }),
            input: Box::new(ChannelInput {
                half: Arc::clone(&write_half),
            }),
            resizer: Box::new(ChannelResizer { half: write_half }),
        })
    }
}

impl RemoteShell for SshShell {
    fn prepare<'a>(
        &'a mut self,
        pty: &'a PtyRequest,
    ) -> BoxFuture<'a, Result<ShellStreams, SessionError>> {
        Box::pin(self.start(pty))
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(handle) = self.handle.take() {
                disconnect(&handle).await;
                tracing::debug!("SSH connection closed");
            }
        })
    }
}

async fn disconnect(handle: &Handle<AcceptAnyHostKey>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "English")
        .await
    {
        tracing::debug!(error = %e, "SSH disconnect reported an error");
    }
}

/// Waits for the server's answer to a `want_reply` channel request.
async fn await_reply(channel: &mut Channel<Msg>) -> Result<(), String> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => return Err("request refused by server".to_string()),
            Some(ChannelMsg::Close) | Some(ChannelMsg::Eof) | None => {
                return Err("channel closed before reply".to_string())
            }
            Some(_) => continue,
        }
    }
}

/// Shell output: stdout and stderr interleaved in arrival order.
struct ChannelOutput {
    half: ChannelReadHalf,
    pending: Vec<u8>,
    offset: usize,
}

impl ChannelOutput {
    async fn read_into(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            if self.offset < self.pending.len() {
                let n = buf.len().min(self.pending.len() - self.offset);
                buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }

            match self.half.wait().await {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    self.pending.clear();
                    self.pending.extend_from_slice(&data);
                    self.offset = 0;
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    tracing::debug!(exit_status, "Remote shell exited");
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => return Ok(0),
                Some(_) => {}
            }
        }
    }
}

impl ShellOutput for ChannelOutput {
    fn read_output<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> BoxFuture<'a, std::io::Result<usize>> {
        Box::pin(self.read_into(buf))
    }
}

struct ChannelInput {
    half: Arc<ChannelWriteHalf<Msg>>,
}

impl ShellInput for ChannelInput {
    fn write_input<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, std::io::Result<()>> {
        Box::pin(async move { self.half.data(data).await.map_err(std::io::Error::other) })
    }
}

struct ChannelResizer {
    half: Arc<ChannelWriteHalf<Msg>>,
}

impl PtyResize for ChannelResizer {
    fn resize(&self, geometry: TerminalGeometry) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move {
            self.half
                .window_change(geometry.cols, geometry.rows, 0, 0)
                .await
                .map_err(|e| SessionError::ResizeFailed(e.to_string()))
        })
    }
}
