//! Consumer-side windowed puller.
//!
//! Keeps `[min_seq, max_seq)` requested for every accepted remote. A
//! response inside the window acknowledges everything up to and including
//! its sequence number and slides the window forward by the same amount,
//! which keeps the pipeline full even when one response carries a batch of
//! several messages.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::table::SessionTable;
use crate::config::GlobalConfig;
use crate::device::MessageSink;
use crate::models::message::split_payload;
use crate::models::name::{Namespace, PullName};
use crate::models::session::{Session, WindowCheck};
use crate::transport::{OutgoingRequest, PullTransport, RequestPurpose};
use crate::Result;

/// Content of the answer to a handshake or heartbeat request.
pub const HANDSHAKE_ACCEPTED: &[u8] = b"ACCEPTED";

/// How a handshake was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// First contact: a session was created and the window prewarmed.
    New,
    /// The remote was already known; treated as a heartbeat.
    Heartbeat,
}

/// What happened to one data response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// No session for the remote.
    UnknownRemote,
    /// Sequence number already acknowledged.
    Stale,
    /// Sequence number was never requested.
    Unrequested,
    /// Payload is not a whole number of messages.
    Malformed,
    /// Window advanced and `advance` new requests were issued.
    Accepted {
        /// How far `min_seq` moved.
        advance: u64,
    },
    /// Payload carried the termination sentinel; the session is gone.
    Terminated,
}

/// Consumer side of the pull protocol.
pub struct WindowedPuller {
    table: Arc<SessionTable>,
    transport: Arc<dyn PullTransport>,
    sink: Arc<dyn MessageSink>,
    namespace: Namespace,
    prewarm_amount: u64,
    request_lifetime: Duration,
    prewarm_delay: Duration,
    freshness: Duration,
}

impl WindowedPuller {
    /// Build a puller over `table`.
    #[must_use]
    pub fn new(
        config: &GlobalConfig,
        namespace: Namespace,
        table: Arc<SessionTable>,
        transport: Arc<dyn PullTransport>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            table,
            transport,
            sink,
            namespace,
            prewarm_amount: config.session.prewarm_amount,
            request_lifetime: config.timers.request_lifetime(),
            prewarm_delay: config.timers.prewarm_delay(),
            freshness: config.timers.freshness(),
        }
    }

    /// Sessions this puller drives.
    #[must_use]
    pub fn table(&self) -> &Arc<SessionTable> {
        &self.table
    }

    /// Accept `remote_id`, prewarming its window on first contact.
    pub async fn accept(&self, remote_id: &str) -> Acceptance {
        let acceptance = self.register(remote_id).await;
        if acceptance == Acceptance::New {
            self.prewarm(remote_id).await;
        }
        acceptance
    }

    /// Handle an inbound handshake/heartbeat request: register the remote,
    /// answer the request, then prewarm after a short delay if it is new.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the answer cannot be sent.
    pub async fn on_handshake(&self, request: &PullName) -> Result<Acceptance> {
        let remote_id = request.peer.as_str();
        let acceptance = self.register(remote_id).await;

        self.transport.respond(
            request.name(),
            Bytes::from_static(HANDSHAKE_ACCEPTED),
            self.freshness,
        )?;

        if acceptance == Acceptance::New {
            // Let the handshake answer reach the producer before the first pull.
            tokio::time::sleep(self.prewarm_delay).await;
            self.prewarm(remote_id).await;
        }
        Ok(acceptance)
    }

    /// Validate and consume one data response.
    pub async fn on_response(&self, remote_id: &str, seq: u64, payload: &[u8]) -> ResponseOutcome {
        let units = split_payload(payload);

        let verdict = self
            .table
            .update(remote_id, |session| match session.check_window(seq) {
                WindowCheck::Stale => ResponseOutcome::Stale,
                WindowCheck::Unrequested => ResponseOutcome::Unrequested,
                WindowCheck::Accept { .. } if units.is_err() => ResponseOutcome::Malformed,
                WindowCheck::Accept { advance } => {
                    session.min_seq += advance;
                    session.touch();
                    debug!(
                        remote = remote_id,
                        seq,
                        min_seq = session.min_seq,
                        max_seq = session.max_seq,
                        "window advanced"
                    );
                    ResponseOutcome::Accepted { advance }
                }
            })
            .await;

        let Some(outcome) = verdict else {
            warn!(remote = remote_id, seq, "response for unknown remote dropped");
            return ResponseOutcome::UnknownRemote;
        };

        let advance = match outcome {
            ResponseOutcome::Accepted { advance } => advance,
            ResponseOutcome::Stale => {
                debug!(remote = remote_id, seq, "stale response dropped");
                return outcome;
            }
            ResponseOutcome::Unrequested => {
                warn!(remote = remote_id, seq, "response beyond requested window dropped");
                return outcome;
            }
            ResponseOutcome::Malformed => {
                warn!(remote = remote_id, seq, len = payload.len(), "malformed payload dropped");
                return outcome;
            }
            ResponseOutcome::UnknownRemote | ResponseOutcome::Terminated => return outcome,
        };

        for message in units.unwrap_or_default() {
            if let Err(err) = self.sink.deliver(remote_id, message) {
                warn!(remote = remote_id, %err, "device rejected message");
            }
            if message.is_termination() {
                info!(remote = remote_id, "termination received, deleting session");
                self.table.remove(remote_id).await;
                return ResponseOutcome::Terminated;
            }
        }

        for _ in 0..advance {
            self.request_next(remote_id).await;
        }
        ResponseOutcome::Accepted { advance }
    }

    /// A data pull expired. The slot is abandoned, not re-requested.
    pub fn on_request_timeout(&self, remote_id: &str, seq: u64) {
        warn!(remote = remote_id, seq, "pull request timed out");
    }

    async fn register(&self, remote_id: &str) -> Acceptance {
        let inserted = self
            .table
            .upsert(remote_id, || Session::accepted(remote_id))
            .await;
        if inserted {
            info!(remote = remote_id, "connection accepted");
            Acceptance::New
        } else {
            self.table.update(remote_id, Session::touch).await;
            debug!(remote = remote_id, "heartbeat received");
            Acceptance::Heartbeat
        }
    }

    async fn prewarm(&self, remote_id: &str) {
        for _ in 0..self.prewarm_amount {
            self.request_next(remote_id).await;
        }
    }

    /// Reserve the next sequence number and pull it.
    async fn request_next(&self, remote_id: &str) -> Option<u64> {
        let Some(seq) = self.table.update(remote_id, Session::reserve_next).await else {
            warn!(remote = remote_id, "request for non-existent remote dropped");
            return None;
        };

        let request = OutgoingRequest {
            name: self.namespace.data_name(remote_id, seq).name().clone(),
            lifetime: self.request_lifetime,
            must_be_fresh: true,
            purpose: RequestPurpose::Data {
                remote_id: remote_id.to_owned(),
                seq,
            },
        };
        debug!(remote = remote_id, seq, name = %request.name, "sending pull request");
        if let Err(err) = self.transport.express(request) {
            warn!(remote = remote_id, seq, %err, "pull request not sent");
        }
        Some(seq)
    }
}
