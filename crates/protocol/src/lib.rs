//! # WebSSH Protocol Library
//!
//! Wire-level types shared by the WebSSH bridge and its tests.
//!
//! ## Overview
//!
//! A browser client talks to the bridge over a single WebSocket:
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ 1st message   credential JSON (ip/user/pass)  │
//! ├───────────────────────────────────────────────┤
//! │ text frames   raw keystrokes  → shell stdin   │
//! │ binary frames resize record   → pty geometry  │
//! ├───────────────────────────────────────────────┤
//! │ text frames   shell output    ← shell stdout  │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ControlMessage, FrameKind, TerminalGeometry};
//!
//! let msg = ControlMessage::classify(FrameKind::Binary, br#"{"width":100,"height":30}"#.to_vec())
//!     .unwrap();
//! assert_eq!(msg, ControlMessage::Resize(TerminalGeometry::new(30, 100)));
//! ```
//!
//! ## Modules
//!
//! - [`credentials`]: Credential payload decoding
//! - [`messages`]: Frame classification and terminal geometry
//! - [`error`]: Error types

pub mod credentials;
pub mod error;
pub mod messages;

pub use credentials::{Credentials, Password};
pub use error::{ProtocolError, Result};
pub use messages::{
    decode_resize, ControlMessage, FrameKind, ResizeRequest, TerminalGeometry, DEFAULT_COLS,
    DEFAULT_ROWS,
};
