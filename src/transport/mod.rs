//! Pull-transport abstraction.
//!
//! The [`PullTransport`] trait decouples the session core from the
//! interest-for-content exchange underneath it. A transport delivers
//! everything it observes for a node as [`TransportEvent`]s on the
//! channel it was created with; the node's dispatch loop consumes them.
//!
//! Two implementations ship with the crate: [`memory::MemoryHub`] for
//! in-process wiring and tests, and [`udp::UdpFace`] for talking to a
//! single upstream peer over UDP.

pub mod memory;
pub mod packet;
pub mod udp;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;

use crate::models::name::Name;
use crate::Result;

/// Why a request was issued; echoed back with its response or timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPurpose {
    /// Pull of one data sequence number from `remote_id`'s stream.
    Data {
        /// Session the pull belongs to.
        remote_id: String,
        /// Requested sequence number.
        seq: u64,
    },
    /// Liveness probe for `remote_id`'s session.
    Heartbeat {
        /// Session being probed.
        remote_id: String,
    },
}

/// One outstanding pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    /// Fully qualified name being requested.
    pub name: Name,
    /// How long the transport keeps the request pending before timing out.
    pub lifetime: Duration,
    /// Whether cached content may be returned.
    pub must_be_fresh: bool,
    /// Caller bookkeeping, returned untouched.
    pub purpose: RequestPurpose,
}

/// Everything a transport reports back to the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer asked for a name under one of our registered prefixes.
    Request {
        /// Requested name.
        name: Name,
    },
    /// An outstanding request was answered.
    Response {
        /// The request being answered.
        request: OutgoingRequest,
        /// Response content.
        payload: Bytes,
    },
    /// An outstanding request expired unanswered.
    Timeout {
        /// The request that expired.
        request: OutgoingRequest,
    },
}

/// Interest-for-content exchange primitive consumed by the session core.
///
/// `express` and `respond` never block: implementations hand the packet
/// off and return, so callers may invoke them from any task.
pub trait PullTransport: Send + Sync {
    /// Start receiving inbound requests whose names fall under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// prefix cannot be registered.
    fn register_prefix(&self, prefix: Name) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Issue one pull request. Exactly one `Response` or `Timeout` event
    /// follows for it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// request cannot be handed to the network.
    fn express(&self, request: OutgoingRequest) -> Result<()>;

    /// Answer a previously received request.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// response cannot be sent.
    fn respond(&self, name: &Name, payload: Bytes, freshness: Duration) -> Result<()>;
}
