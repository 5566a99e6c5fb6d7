//! Input relay: socket messages → shell input or pty resize.

use futures_util::{Stream, StreamExt};
use protocol::{ControlMessage, FrameKind};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use super::{Completion, RelayError, RelayExit, ResizeController};
use crate::session::ShellInput;

/// Reads socket messages until the client closes or something fails.
///
/// Text messages are written to the shell verbatim. Binary messages must
/// hold a resize record; a malformed one ends the relay. Resize failures are
/// logged by the [`ResizeController`] and do not end the relay.
pub async fn run_input_relay<St>(
    mut stream: St,
    mut input: Box<dyn ShellInput>,
    mut resize: ResizeController,
    done: Completion,
) where
    St: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let mut written: u64 = 0;

    let exit = loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(WsError::ConnectionClosed)) | None => {
                tracing::info!("Connection closed from the client");
                break RelayExit::Finished;
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Cannot read from websocket");
                break RelayExit::Failed(RelayError::Io(e.to_string()));
            }
        };

        let (kind, payload) = match message {
            WsMessage::Text(text) => (FrameKind::Text, text.into_bytes()),
            WsMessage::Binary(data) => (FrameKind::Binary, data),
            WsMessage::Close(frame) => {
                tracing::info!(?frame, "Connection closed from the client");
                break RelayExit::Finished;
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
        };

        match ControlMessage::classify(kind, payload) {
            Ok(ControlMessage::Data(bytes)) => {
                if let Err(e) = input.write_input(&bytes).await {
                    tracing::error!(error = %e, "Cannot write to ssh stdin");
                    break RelayExit::Failed(RelayError::Io(e.to_string()));
                }
                written += bytes.len() as u64;
            }
            Ok(ControlMessage::Resize(geometry)) => {
                resize.apply(geometry).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot decode resize message");
                break RelayExit::Failed(RelayError::ControlDecode(e));
            }
        }
    };

    let geometry = resize.current();
    tracing::debug!(
        bytes = written,
        resizes = resize.applied(),
        rows = geometry.rows,
        cols = geometry.cols,
        "Input relay stopped"
    );
    done.signal(exit, written);
}
