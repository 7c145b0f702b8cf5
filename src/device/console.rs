//! Line-oriented console source.
//!
//! Each input line holds up to three bytes separated by whitespace or
//! commas, written in decimal (`144 64 90`) or hex (`0x90 0x40 0x5a`).
//! Missing bytes are zero. An empty line or end of input queues the
//! termination sentinel and ends the source.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::message::{MidiMessage, MESSAGE_LEN};
use crate::session::responder::{EnqueueOutcome, ResponderQueue};
use crate::{AppError, Result};

/// Parse one input line. Returns `None` for a blank line.
///
/// # Errors
///
/// Returns `AppError::Device` for more than three values or a value that
/// is not a byte.
pub fn parse_line(line: &str) -> Result<Option<MidiMessage>> {
    let tokens: Vec<&str> = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .collect();

    if tokens.is_empty() {
        return Ok(None);
    }
    if tokens.len() > MESSAGE_LEN {
        return Err(AppError::Device(format!(
            "expected at most {MESSAGE_LEN} bytes, got {}",
            tokens.len()
        )));
    }

    let bytes = tokens
        .iter()
        .map(|token| parse_byte(token))
        .collect::<Result<Vec<u8>>>()?;
    Ok(Some(MidiMessage::from_padded(&bytes)))
}

fn parse_byte(token: &str) -> Result<u8> {
    let parsed = match token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => token.parse::<u8>(),
    };
    parsed.map_err(|err| AppError::Device(format!("invalid byte {token:?}: {err}")))
}

/// Feed `reader` into `remote_id`'s outbound queue until a blank line, end
/// of input, or cancellation. Returns the number of messages queued,
/// including the final termination sentinel.
///
/// # Errors
///
/// Returns `AppError::Io` if reading fails.
pub async fn pump_lines<R>(
    mut reader: R,
    responder: &ResponderQueue,
    remote_id: &str,
    cancel: &CancellationToken,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut queued = 0;
    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::select! {
            () = cancel.cancelled() => return Ok(queued),
            read = reader.read_line(&mut line) => read?,
        };

        let message = if read == 0 {
            MidiMessage::TERMINATION
        } else {
            match parse_line(&line) {
                Ok(Some(message)) => message,
                Ok(None) => MidiMessage::TERMINATION,
                Err(err) => {
                    warn!(%err, "input line ignored");
                    continue;
                }
            }
        };

        debug!(%message, "input");
        let outcome = responder.enqueue_outbound(remote_id, message).await;
        queued += 1;
        if message.is_termination() {
            if outcome == EnqueueOutcome::Queued {
                info!(remote = remote_id, "input finished, termination queued");
            } else {
                warn!(remote = remote_id, ?outcome, "input finished, termination dropped");
            }
            return Ok(queued);
        }
    }
}

/// Spawn a task pumping process stdin into `remote_id`'s outbound queue.
#[must_use]
pub fn spawn_stdin_source(
    responder: Arc<ResponderQueue>,
    remote_id: String,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            if let Err(err) = pump_lines(stdin, &responder, &remote_id, &cancel).await {
                warn!(%err, "stdin source failed");
            }
        }
        .instrument(info_span!("stdin_source")),
    )
}
