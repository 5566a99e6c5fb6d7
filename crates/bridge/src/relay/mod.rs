//! Byte relays between the socket channel and the remote shell.
//!
//! Two relays run per session:
//! - [`output`]: shell output → text messages on the socket
//! - [`input`]: socket messages → shell input or pty resize
//!
//! Each relay reports its exit exactly once through a [`Completion`] handle.
//! The handle also reports when it is dropped unsignalled, so an aborted or
//! panicked relay still wakes the coordinator.

pub mod input;
pub mod output;
pub mod resize;

use std::fmt;
use std::time::Duration;

use protocol::ProtocolError;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::RelayConfig;

pub use input::run_input_relay;
pub use output::run_output_relay;
pub use resize::ResizeController;

/// Errors that end a relay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Writing to the shell or the socket failed.
    #[error("relay I/O failure: {0}")]
    Io(String),

    /// A binary frame did not hold a valid resize record.
    #[error("control decode failure: {0}")]
    ControlDecode(#[from] ProtocolError),

    /// A socket send did not complete within the deadline.
    #[error("send did not complete within {0:?}")]
    WriteTimeout(Duration),
}

/// Which relay an outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayKind {
    Output,
    Input,
}

impl fmt::Display for RelayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayKind::Output => write!(f, "output"),
            RelayKind::Input => write!(f, "input"),
        }
    }
}

/// Why a relay stopped.
#[derive(Debug)]
pub enum RelayExit {
    /// The source ended: shell EOF or client close.
    Finished,
    /// The relay hit an error it does not recover from.
    Failed(RelayError),
    /// The relay task went away without reporting.
    Aborted,
}

impl RelayExit {
    pub fn is_clean(&self) -> bool {
        matches!(self, RelayExit::Finished)
    }
}

/// Final report of one relay.
#[derive(Debug)]
pub struct RelayOutcome {
    pub kind: RelayKind,
    pub exit: RelayExit,
    /// Payload bytes moved before the relay stopped.
    pub bytes: u64,
}

/// Runtime parameters shared by both relays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub read_buffer_size: usize,
    pub write_timeout: Duration,
    pub idle_pause: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for RelaySettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            read_buffer_size: config.read_buffer_size,
            write_timeout: Duration::from_secs(config.write_timeout_secs),
            idle_pause: Duration::from_millis(config.idle_pause_ms),
        }
    }
}

/// One-shot exit notification for a relay.
pub struct Completion {
    kind: RelayKind,
    tx: Option<mpsc::UnboundedSender<RelayOutcome>>,
}

impl Completion {
    pub fn new(kind: RelayKind, tx: mpsc::UnboundedSender<RelayOutcome>) -> Self {
        Self { kind, tx: Some(tx) }
    }

    /// Creates a signal pair for the two relays of one session.
    pub fn pair() -> (Self, Self, mpsc::UnboundedReceiver<RelayOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self::new(RelayKind::Output, tx.clone()),
            Self::new(RelayKind::Input, tx),
            rx,
        )
    }

    /// Reports the relay's exit. Consumes the handle.
    pub fn signal(mut self, exit: RelayExit, bytes: u64) {
        self.send(exit, bytes);
    }

    fn send(&mut self, exit: RelayExit, bytes: u64) {
        if let Some(tx) = self.tx.take() {
            // The coordinator may already be gone.
            let _ = tx.send(RelayOutcome {
                kind: self.kind,
                exit,
                bytes,
            });
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.send(RelayExit::Aborted, 0);
    }
}
