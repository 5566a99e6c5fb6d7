//! Output relay: shell output → text messages.

use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use super::{Completion, RelayError, RelayExit, RelaySettings};
use crate::session::ShellOutput;

/// Copies shell output to the socket until the shell output ends or a send
/// fails.
///
/// Each read of up to `read_buffer_size` bytes becomes one text message.
/// Read errors are logged and retried after `idle_pause`. Returns the sink
/// so the caller can close the socket.
///
/// Text frames must be valid UTF-8. A multi-byte character split across two
/// reads is held back and sent with the next read, so valid UTF-8 output
/// arrives byte for byte. Bytes that are not valid UTF-8 are replaced with
/// U+FFFD, so binary shell output is not forwarded unchanged.
pub async fn run_output_relay<S>(
    mut output: Box<dyn ShellOutput>,
    mut sink: S,
    settings: RelaySettings,
    done: Completion,
) -> S
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let mut buffer = vec![0u8; settings.read_buffer_size];
    let mut decoder = Utf8Carry::default();
    let mut sent: u64 = 0;

    let exit = loop {
        let n = match output.read_output(&mut buffer).await {
            Ok(0) => {
                tracing::debug!("Shell output stream ended");
                let rest = decoder.finish();
                if !rest.is_empty() {
                    let len = rest.len() as u64;
                    if let Err(e) = send_text(&mut sink, rest, settings.write_timeout).await {
                        tracing::error!(error = %e, "Cannot write to websocket");
                        break RelayExit::Failed(e);
                    }
                    sent += len;
                }
                break RelayExit::Finished;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot read from shell output");
                tokio::time::sleep(settings.idle_pause).await;
                continue;
            }
        };

        let text = decoder.push(&buffer[..n]);
        if text.is_empty() {
            continue;
        }

        let len = text.len() as u64;
        if let Err(e) = send_text(&mut sink, text, settings.write_timeout).await {
            tracing::error!(error = %e, "Cannot write to websocket");
            break RelayExit::Failed(e);
        }
        sent += len;
    };

    tracing::debug!(bytes = sent, "Output relay stopped");
    done.signal(exit, sent);
    sink
}

async fn send_text<S>(sink: &mut S, text: String, deadline: Duration) -> Result<(), RelayError>
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    match tokio::time::timeout(deadline, sink.send(WsMessage::Text(text))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RelayError::Io(e.to_string())),
        Err(_) => Err(RelayError::WriteTimeout(deadline)),
    }
}

/// Incremental UTF-8 decoder.
///
/// A multi-byte character split across two reads is held back until its
/// remaining bytes arrive. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Carry {
    partial: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.partial.extend_from_slice(bytes);

        let mut text = String::with_capacity(self.partial.len());
        let mut rest: &[u8] = &self.partial;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.partial.len() - rest.len();
        self.partial.drain(..consumed);
        text
    }

    /// Flushes whatever is held back.
    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        text
    }
}
