//! Datagram wire format for [`UdpFace`](super::udp::UdpFace).
//!
//! One JSON object per datagram, tagged by `type`:
//!
//! ```json
//! {"type":"request","name":"/topo-prefix/alice/midi-ndn/jam/7","lifetime_ms":3600000,"must_be_fresh":true}
//! {"type":"response","name":"/topo-prefix/alice/midi-ndn/jam/7","content":[144,64,90],"freshness_ms":1000,"digest":"…"}
//! ```
//!
//! Responses carry a SHA-256 digest over the name and content; receivers
//! drop responses whose digest does not verify.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{AppError, Result};

/// Largest datagram accepted or produced.
pub const MAX_DATAGRAM_BYTES: usize = 8_192;

/// A single transport datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Packet {
    /// Pull request for one name.
    Request {
        /// Requested name in URI form.
        name: String,
        /// Requester-side lifetime in milliseconds.
        lifetime_ms: u64,
        /// Whether stale cached content is unacceptable.
        #[serde(default)]
        must_be_fresh: bool,
    },
    /// Answer to a request with the same name.
    Response {
        /// Name of the request being answered.
        name: String,
        /// Raw content bytes.
        content: Vec<u8>,
        /// How long the content counts as fresh, in milliseconds.
        freshness_ms: u64,
        /// Lower-case hex SHA-256 over name and content.
        digest: String,
    },
}

impl Packet {
    /// Build a signed response packet.
    #[must_use]
    pub fn signed_response(name: String, content: Vec<u8>, freshness_ms: u64) -> Self {
        let digest = content_digest(&name, &content);
        Self::Response {
            name,
            content,
            freshness_ms,
            digest,
        }
    }

    /// Serialize into a datagram.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if serialization fails or the datagram
    /// would exceed [`MAX_DATAGRAM_BYTES`].
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_DATAGRAM_BYTES {
            return Err(AppError::Transport(format!(
                "packet too large: {} bytes exceeds {MAX_DATAGRAM_BYTES}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Parse a datagram, verifying the digest of responses.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` for malformed JSON and
    /// `AppError::Protocol` for a response whose digest does not match.
    pub fn decode(datagram: &[u8]) -> Result<Self> {
        let packet: Self = serde_json::from_slice(datagram)?;
        if let Self::Response {
            ref name,
            ref content,
            ref digest,
            ..
        } = packet
        {
            if content_digest(name, content) != *digest {
                return Err(AppError::Protocol(format!(
                    "digest mismatch on response {name}"
                )));
            }
        }
        Ok(packet)
    }
}

/// Compute the SHA-256 hex digest binding `content` to `name`.
#[must_use]
pub fn content_digest(name: &str, content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
