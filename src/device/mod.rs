//! Device-side collaborators: where received messages go and where
//! outbound messages come from.

pub mod console;

use tokio::sync::mpsc;
use tracing::info;

use crate::models::message::MidiMessage;
use crate::{AppError, Result};

/// Consumer of received message units.
pub trait MessageSink: Send + Sync {
    /// Play back or otherwise consume one message from `remote_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Device`] if the device rejects the message.
    fn deliver(&self, remote_id: &str, message: MidiMessage) -> Result<()>;
}

/// Sink that writes every message to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MessageSink for LogSink {
    fn deliver(&self, remote_id: &str, message: MidiMessage) -> Result<()> {
        info!(remote = remote_id, %message, "received message");
        Ok(())
    }
}

/// Sink forwarding messages into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(String, MidiMessage)>,
}

impl ChannelSink {
    /// Create the sink and the receiver that observes it.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, MidiMessage)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MessageSink for ChannelSink {
    fn deliver(&self, remote_id: &str, message: MidiMessage) -> Result<()> {
        self.tx
            .send((remote_id.to_owned(), message))
            .map_err(|_| AppError::Device("message receiver closed".into()))
    }
}
