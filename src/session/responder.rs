//! Producer-side request/message matching.
//!
//! Inbound pull requests and application messages queue up independently
//! in each session's [`ResponderBacklog`](crate::models::session::ResponderBacklog).
//! A response is produced only when both sides have something: one request
//! is answered with a batch of up to `max_batch` messages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::table::SessionTable;
use crate::config::GlobalConfig;
use crate::models::message::{join_payload, MidiMessage};
use crate::models::name::Name;
use crate::models::session::{OutboundItem, PendingRequest, Session};
use crate::transport::PullTransport;

/// What happened to an inbound pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Queued for the next matching message.
    Queued,
    /// No session for the remote.
    UnknownRemote,
    /// Session exists but has not (re)connected.
    NotConnected,
    /// Duplicate or out-of-order request.
    OutOfOrder {
        /// Lowest sequence number that would have been accepted.
        expected_next: u64,
    },
    /// Sequence number is the last representable one; nothing could follow it.
    SequenceExhausted,
}

/// What happened to an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Waiting for a request.
    Queued,
    /// Session is disconnected; its backlog was cleared instead.
    Discarded,
    /// No session for the remote.
    UnknownRemote,
}

/// One response produced by [`ResponderQueue::drain_once`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedResponse {
    /// Session answered.
    pub remote_id: String,
    /// Name the response was addressed to.
    pub name: Name,
    /// Sequence number of the answered request.
    pub seq: u64,
    /// Messages packed into the response.
    pub messages: Vec<MidiMessage>,
    /// Whether the batch carried the termination sentinel.
    pub terminated: bool,
}

/// Producer side of the pull protocol.
pub struct ResponderQueue {
    table: Arc<SessionTable>,
    transport: Arc<dyn PullTransport>,
    max_batch: usize,
    freshness: Duration,
    wake: Notify,
    next_order: AtomicU64,
}

impl ResponderQueue {
    /// Build a responder over `table`.
    #[must_use]
    pub fn new(
        config: &GlobalConfig,
        table: Arc<SessionTable>,
        transport: Arc<dyn PullTransport>,
    ) -> Self {
        Self {
            table,
            transport,
            max_batch: config.session.max_batch,
            freshness: config.timers.freshness(),
            wake: Notify::new(),
            next_order: AtomicU64::new(0),
        }
    }

    /// Sessions this responder serves.
    #[must_use]
    pub fn table(&self) -> &Arc<SessionTable> {
        &self.table
    }

    /// Start serving `remote_id`. The session stays disconnected until the
    /// first heartbeat answer arrives.
    pub async fn open(&self, remote_id: &str) -> bool {
        self.table
            .upsert(remote_id, || Session::tracked(remote_id))
            .await
    }

    /// Queue an inbound pull request for `seq`.
    pub async fn on_request_arrived(&self, remote_id: &str, seq: u64, name: &Name) -> RequestOutcome {
        let order = self.next_order.fetch_add(1, Ordering::Relaxed);
        let outcome = self
            .table
            .update(remote_id, |session| {
                if !session.connected {
                    return RequestOutcome::NotConnected;
                }
                if seq < session.expected_next {
                    return RequestOutcome::OutOfOrder {
                        expected_next: session.expected_next,
                    };
                }
                let Some(next) = seq.checked_add(1) else {
                    return RequestOutcome::SequenceExhausted;
                };
                session.backlog.push_request(PendingRequest {
                    remote_id: remote_id.to_owned(),
                    seq,
                    name: name.clone(),
                    order,
                });
                session.expected_next = next;
                RequestOutcome::Queued
            })
            .await
            .unwrap_or(RequestOutcome::UnknownRemote);

        match outcome {
            RequestOutcome::Queued => {
                debug!(remote = remote_id, seq, "pull request queued");
                self.wake.notify_one();
            }
            RequestOutcome::NotConnected => {
                warn!(remote = remote_id, seq, "connection not set up, request dropped");
            }
            RequestOutcome::OutOfOrder { expected_next } => {
                warn!(remote = remote_id, seq, expected_next, "out-of-order request dropped");
            }
            RequestOutcome::SequenceExhausted => {
                warn!(remote = remote_id, seq, "sequence number out of range, request dropped");
            }
            RequestOutcome::UnknownRemote => {
                warn!(remote = remote_id, seq, "request for unknown session dropped");
            }
        }
        outcome
    }

    /// Queue one application message for `remote_id`.
    pub async fn enqueue_outbound(&self, remote_id: &str, message: MidiMessage) -> EnqueueOutcome {
        let outcome = self
            .table
            .update(remote_id, |session| {
                if session.connected {
                    session.backlog.push_outbound(OutboundItem { message });
                    EnqueueOutcome::Queued
                } else {
                    session.backlog.clear();
                    EnqueueOutcome::Discarded
                }
            })
            .await
            .unwrap_or(EnqueueOutcome::UnknownRemote);

        match outcome {
            EnqueueOutcome::Queued => self.wake.notify_one(),
            EnqueueOutcome::Discarded => {
                debug!(remote = remote_id, %message, "not connected, message discarded");
            }
            EnqueueOutcome::UnknownRemote => {
                warn!(remote = remote_id, %message, "message for unknown session dropped");
            }
        }
        outcome
    }

    /// Queue raw input, zero-padded or truncated to one message.
    pub async fn add_input(&self, remote_id: &str, input: &[u8]) -> EnqueueOutcome {
        self.enqueue_outbound(remote_id, MidiMessage::from_padded(input))
            .await
    }

    /// Answer every session that has both a pending request and pending
    /// messages, once each. Sessions whose batch carried the termination
    /// sentinel are removed after their response is sent.
    pub async fn drain_once(&self) -> Vec<EmittedResponse> {
        let max_batch = self.max_batch;
        let mut drained = Vec::new();
        self.table
            .for_each(|_, session| {
                if let Some(pair) = session.backlog.drain_pair(max_batch) {
                    drained.push(pair);
                }
            })
            .await;
        drained.sort_by_key(|(request, _)| request.order);

        let mut emitted = Vec::with_capacity(drained.len());
        for (request, items) in drained {
            let messages: Vec<MidiMessage> = items.iter().map(|item| item.message).collect();
            let terminated = messages.iter().any(MidiMessage::is_termination);
            let payload = join_payload(&messages);

            debug!(
                remote = %request.remote_id,
                seq = request.seq,
                count = messages.len(),
                "sending data"
            );
            if let Err(err) = self.transport.respond(&request.name, payload, self.freshness) {
                warn!(remote = %request.remote_id, seq = request.seq, %err, "response not sent");
            }

            if terminated {
                info!(remote = %request.remote_id, "termination sent, closing session");
                self.table.remove(&request.remote_id).await;
            }

            emitted.push(EmittedResponse {
                remote_id: request.remote_id,
                name: request.name,
                seq: request.seq,
                messages,
                terminated,
            });
        }
        emitted
    }

    /// Spawn the drain loop. It parks until a request or message arrives,
    /// then drains until nothing more can be matched.
    #[must_use]
    pub fn spawn_drain_task(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            debug!("drain task shutting down");
                            break;
                        }
                        () = self.wake.notified() => {
                            while !self.drain_once().await.is_empty() {}
                        }
                    }
                }
            }
            .instrument(info_span!("responder_drain")),
        )
    }
}
