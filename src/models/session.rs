//! Per-remote session state and the responder backlog.

use std::collections::VecDeque;

use super::message::MidiMessage;
use super::name::Name;

/// An inbound "give me sequence N" request waiting for outbound data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Session the request belongs to.
    pub remote_id: String,
    /// Requested sequence number.
    pub seq: u64,
    /// Full request name; the response is addressed to it.
    pub name: Name,
    /// Monotonic creation order across all sessions.
    pub order: u64,
}

/// One application message queued for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundItem {
    /// Message payload.
    pub message: MidiMessage,
}

/// Paired FIFO queues matched by the responder.
///
/// Items leave only through [`drain_pair`](Self::drain_pair), which takes
/// one request together with a batch of outbound items, or through
/// [`clear`](Self::clear).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponderBacklog {
    requests: VecDeque<PendingRequest>,
    outbound: VecDeque<OutboundItem>,
}

impl ResponderBacklog {
    /// Queue an inbound request.
    pub fn push_request(&mut self, request: PendingRequest) {
        self.requests.push_back(request);
    }

    /// Queue an outbound message.
    pub fn push_outbound(&mut self, item: OutboundItem) {
        self.outbound.push_back(item);
    }

    /// Requests still waiting for data.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// Messages still waiting for a request.
    #[must_use]
    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    /// Whether both queues are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.outbound.is_empty()
    }

    /// Whether a response could be emitted right now.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.requests.is_empty() && !self.outbound.is_empty()
    }

    /// Drop everything queued on both sides.
    pub fn clear(&mut self) {
        self.requests.clear();
        self.outbound.clear();
    }

    /// Take the oldest request and up to `max_batch` of the oldest outbound
    /// items, or nothing if either queue is empty.
    pub fn drain_pair(&mut self, max_batch: usize) -> Option<(PendingRequest, Vec<OutboundItem>)> {
        if !self.is_ready() || max_batch == 0 {
            return None;
        }
        let request = self.requests.pop_front()?;
        let take = self.outbound.len().min(max_batch);
        let items = self.outbound.drain(..take).collect();
        Some((request, items))
    }
}

/// Where a response sequence number falls relative to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCheck {
    /// Below `min_seq`: already acknowledged.
    Stale,
    /// At or above `max_seq`: never requested.
    Unrequested,
    /// Inside the window; acknowledging it moves `min_seq` by `advance`.
    Accept {
        /// Number of sequence numbers acknowledged.
        advance: u64,
    },
}

/// State held for one remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session key (the stream owner's peer id).
    pub remote_id: String,
    /// Smallest sequence number not yet acknowledged.
    pub min_seq: u64,
    /// Next sequence number to request.
    pub max_seq: u64,
    /// Sweep ticks since the last activity.
    pub inactivity_ticks: u32,
    /// Whether a handshake or heartbeat response has been observed.
    pub connected: bool,
    /// Consecutive unanswered heartbeat probes.
    pub heartbeat_misses: u32,
    /// Lowest inbound request sequence number still acceptable.
    pub expected_next: u64,
    /// Producer-side request/message matching queues.
    pub backlog: ResponderBacklog,
}

impl Session {
    /// A consumer-side session for a remote whose handshake was accepted.
    #[must_use]
    pub fn accepted(remote_id: impl Into<String>) -> Self {
        Self {
            connected: true,
            ..Self::tracked(remote_id)
        }
    }

    /// A producer-side session that has not heard a heartbeat answer yet.
    #[must_use]
    pub fn tracked(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            min_seq: 0,
            max_seq: 0,
            inactivity_ticks: 0,
            connected: false,
            heartbeat_misses: 0,
            expected_next: 0,
            backlog: ResponderBacklog::default(),
        }
    }

    /// Classify a response sequence number against `[min_seq, max_seq)`.
    #[must_use]
    pub fn check_window(&self, seq: u64) -> WindowCheck {
        if seq < self.min_seq {
            WindowCheck::Stale
        } else if seq >= self.max_seq {
            WindowCheck::Unrequested
        } else {
            WindowCheck::Accept {
                advance: seq - self.min_seq + 1,
            }
        }
    }

    /// Allocate the next sequence number to request.
    pub fn reserve_next(&mut self) -> u64 {
        let seq = self.max_seq;
        self.max_seq += 1;
        seq
    }

    /// Record activity, resetting the inactivity counter.
    pub fn touch(&mut self) {
        self.inactivity_ticks = 0;
    }

    /// Number of sequence numbers requested but not acknowledged.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.max_seq - self.min_seq
    }
}
