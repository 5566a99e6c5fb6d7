//! # WebSSH Bridge Library
//!
//! Exposes interactive SSH shells to browser clients over a WebSocket.
//!
//! ## Overview
//!
//! Each client opens one WebSocket, sends its SSH credentials as the first
//! message and from then on exchanges terminal traffic:
//!
//! - **Output Relay**: shell output is forwarded as text messages
//! - **Input Relay**: text messages are written to the shell's input
//! - **Resize Controller**: binary messages resize the remote pty
//! - **Lifecycle Coordinator**: tears both sides down when either ends
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  WebSocket  ┌──────────────────────────────┐  SSH  ┌────────┐
//! │  browser   │◄───────────►│ BridgeServer                 │◄─────►│ remote │
//! │  terminal  │             │   └─ BridgeSession (per WS)  │       │ shell  │
//! └────────────┘             │        ├─ output relay       │       └────────┘
//!                            │        └─ input relay        │
//!                            │             └─ resize        │
//!                            └──────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bridge::{BridgeServer, Config, SshConnector};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let connector = Arc::new(SshConnector::from_config(&config.ssh));
//!
//!     let server = BridgeServer::new(config, connector);
//!     let listener = server.bind().await?;
//!     server.run(listener).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: Remote session traits and the SSH implementation
//! - [`relay`]: Output/input relays and the resize controller
//! - [`bridge`]: Per-client lifecycle coordinator
//! - [`server`]: Listener, upgrade policy and shutdown

pub mod bridge;
pub mod config;
pub mod relay;
pub mod server;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

pub use bridge::{BridgeSession, BridgeSettings, SessionReport, SessionState};
pub use config::Config;
pub use relay::{RelayError, RelayExit, RelayKind, RelayOutcome, RelaySettings};
pub use server::{BridgeServer, ServerError, ServerEvent, ServerState, UpgradePolicy};
pub use session::{
    PtyRequest, PtyResize, RemoteLogin, RemoteShell, SessionError, ShellStreams, SshConnector,
    SshTarget,
};
