//! In-band message classification for the socket channel.
//!
//! The WebSocket frame type is the only discriminator between the two kinds
//! of inbound traffic:
//!
//! - **text** frames carry raw keystroke data for the shell, untouched;
//! - **binary** frames carry a resize record `{"width": u32, "height": u32}`.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Initial pty rows when nothing else is configured.
pub const DEFAULT_ROWS: u32 = 60;

/// Initial pty columns when nothing else is configured.
pub const DEFAULT_COLS: u32 = 40;

/// Native frame type of an inbound data-bearing WebSocket message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Text frame: shell input.
    Text,
    /// Binary frame: resize control record.
    Binary,
}

/// Pseudo-terminal size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TerminalGeometry {
    pub rows: u32,
    pub cols: u32,
}

impl TerminalGeometry {
    pub fn new(rows: u32, cols: u32) -> Self {
        Self { rows, cols }
    }
}

impl Default for TerminalGeometry {
    fn default() -> Self {
        Self::new(DEFAULT_ROWS, DEFAULT_COLS)
    }
}

/// Wire shape of a resize control record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResizeRequest {
    /// Terminal width in columns.
    pub width: u32,
    /// Terminal height in rows.
    pub height: u32,
}

impl From<ResizeRequest> for TerminalGeometry {
    fn from(req: ResizeRequest) -> Self {
        Self {
            rows: req.height,
            cols: req.width,
        }
    }
}

impl From<TerminalGeometry> for ResizeRequest {
    fn from(geometry: TerminalGeometry) -> Self {
        Self {
            width: geometry.cols,
            height: geometry.rows,
        }
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Opaque bytes destined for the shell's input.
    Data(Vec<u8>),
    /// New terminal geometry for the live pty.
    Resize(TerminalGeometry),
}

impl ControlMessage {
    /// Classifies a frame by its native type and validates control payloads.
    pub fn classify(kind: FrameKind, payload: Vec<u8>) -> Result<Self> {
        match kind {
            FrameKind::Text => Ok(ControlMessage::Data(payload)),
            FrameKind::Binary => decode_resize(&payload).map(ControlMessage::Resize),
        }
    }
}

/// Decodes a resize record into a geometry.
pub fn decode_resize(payload: &[u8]) -> Result<TerminalGeometry> {
    serde_json::from_slice::<ResizeRequest>(payload)
        .map(TerminalGeometry::from)
        .map_err(|e| ProtocolError::InvalidControl(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_frame_is_data_verbatim() {
        let msg = ControlMessage::classify(FrameKind::Text, b"ls\n".to_vec()).unwrap();
        assert_eq!(msg, ControlMessage::Data(b"ls\n".to_vec()));
    }

    #[test]
    fn test_text_frame_with_json_is_still_data() {
        let payload = br#"{"width":120,"height":40}"#.to_vec();
        let msg = ControlMessage::classify(FrameKind::Text, payload.clone()).unwrap();
        assert_eq!(msg, ControlMessage::Data(payload));
    }

    #[test]
    fn test_binary_frame_is_resize() {
        let msg =
            ControlMessage::classify(FrameKind::Binary, br#"{"width":120,"height":40}"#.to_vec())
                .unwrap();
        assert_eq!(msg, ControlMessage::Resize(TerminalGeometry::new(40, 120)));
    }

    #[test]
    fn test_non_integer_width_fails() {
        let result = decode_resize(br#"{"width":"wide","height":40}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidControl(_))));

        let result = decode_resize(br#"{"width":120.5,"height":40}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidControl(_))));
    }

    #[test]
    fn test_negative_dimension_fails() {
        let result = decode_resize(br#"{"width":-1,"height":40}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_field_fails() {
        let result = decode_resize(br#"{"width":80}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_field_fails() {
        let result = decode_resize(br#"{"width":80,"height":24,"depth":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_garbage_fails() {
        assert!(decode_resize(b"\x00\x01").is_err());
        assert!(decode_resize(b"").is_err());
    }

    #[test]
    fn test_default_geometry() {
        let geometry = TerminalGeometry::default();
        assert_eq!(geometry.rows, 60);
        assert_eq!(geometry.cols, 40);
    }

    #[test]
    fn test_resize_request_from_geometry() {
        let req = ResizeRequest::from(TerminalGeometry::new(30, 100));
        assert_eq!(req, ResizeRequest { width: 100, height: 30 });
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"width":100,"height":30}"#
        );
    }
}
