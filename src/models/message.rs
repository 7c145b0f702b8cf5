//! Fixed-size MIDI messages and the batched payload format.

use std::fmt::{Display, Formatter};

use bytes::{BufMut, Bytes, BytesMut};

use crate::{AppError, Result};

/// Size in bytes of one message unit.
pub const MESSAGE_LEN: usize = 3;

/// One 3-byte MIDI control event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MidiMessage([u8; MESSAGE_LEN]);

impl MidiMessage {
    /// The all-zero payload that tears a session down.
    pub const TERMINATION: Self = Self([0; MESSAGE_LEN]);

    /// Build a message from its status and two data bytes.
    #[must_use]
    pub const fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self([status, data1, data2])
    }

    /// Build a message from arbitrary input, zero-padding short input and
    /// truncating long input. Empty input yields [`MidiMessage::TERMINATION`].
    #[must_use]
    pub fn from_padded(input: &[u8]) -> Self {
        let mut bytes = [0; MESSAGE_LEN];
        let len = input.len().min(MESSAGE_LEN);
        bytes[..len].copy_from_slice(&input[..len]);
        Self(bytes)
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; MESSAGE_LEN] {
        &self.0
    }

    /// Whether this is the termination sentinel.
    #[must_use]
    pub fn is_termination(&self) -> bool {
        *self == Self::TERMINATION
    }
}

impl From<[u8; MESSAGE_LEN]> for MidiMessage {
    fn from(bytes: [u8; MESSAGE_LEN]) -> Self {
        Self(bytes)
    }
}

impl Display for MidiMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let [status, data1, data2] = self.0;
        write!(f, "{status} {data1} {data2}")
    }
}

/// Split a response payload into its message units.
///
/// # Errors
///
/// Returns `AppError::Protocol` if the payload is empty or not a whole
/// number of units.
pub fn split_payload(payload: &[u8]) -> Result<Vec<MidiMessage>> {
    if payload.is_empty() || payload.len() % MESSAGE_LEN != 0 {
        return Err(AppError::Protocol(format!(
            "payload of {} bytes is not a non-empty multiple of {MESSAGE_LEN}",
            payload.len()
        )));
    }
    Ok(payload
        .chunks_exact(MESSAGE_LEN)
        .map(MidiMessage::from_padded)
        .collect())
}

/// Concatenate messages into one response payload.
#[must_use]
pub fn join_payload<'a>(messages: impl IntoIterator<Item = &'a MidiMessage>) -> Bytes {
    let mut buf = BytesMut::new();
    for message in messages {
        buf.put_slice(message.as_bytes());
    }
    buf.freeze()
}
