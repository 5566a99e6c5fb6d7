//! Remote session module.
//!
//! This module provides the outbound side of the bridge: dialing an SSH
//! server, authenticating with a password and starting an interactive shell
//! on a pty.

pub mod remote;
pub mod ssh;

pub use remote::{
    BoxFuture, PtyRequest, PtyResize, RemoteLogin, RemoteShell, SessionError, ShellInput,
    ShellOutput, ShellStreams, SshTarget,
};
pub use ssh::{SshConnector, SshShell};
