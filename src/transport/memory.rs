//! In-process transport hub.
//!
//! [`MemoryHub`] connects any number of [`MemoryFace`]s. Requests are routed
//! to the face with the longest registered prefix matching the name (never
//! back to the face that issued them) and recorded in a pending table until
//! answered or until their lifetime runs out.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{OutgoingRequest, PullTransport, TransportEvent};
use crate::models::name::Name;
use crate::{AppError, Result};

struct Endpoint {
    prefixes: Vec<Name>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

struct PendingEntry {
    origin: usize,
    target: Option<usize>,
    request: OutgoingRequest,
}

#[derive(Default)]
struct HubState {
    endpoints: Vec<Endpoint>,
    pending: HashMap<u64, PendingEntry>,
    next_pending_id: u64,
}

impl HubState {
    fn route(&self, origin: usize, name: &Name) -> Option<usize> {
        self.endpoints
            .iter()
            .enumerate()
            .filter(|(id, _)| *id != origin)
            .filter_map(|(id, endpoint)| {
                endpoint
                    .prefixes
                    .iter()
                    .filter(|prefix| name.starts_with(prefix))
                    .map(Name::len)
                    .max()
                    .map(|len| (id, len))
            })
            .max_by_key(|(_, len)| *len)
            .map(|(id, _)| id)
    }

    fn notify(&self, endpoint: usize, event: TransportEvent) {
        if let Some(endpoint) = self.endpoints.get(endpoint) {
            // A closed receiver means that node has shut down.
            let _ = endpoint.events.send(event);
        }
    }
}

/// Shared in-process network.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new face and return it with the receiver for its events.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the hub lock is poisoned.
    pub fn connect(&self) -> Result<(MemoryFace, mpsc::UnboundedReceiver<TransportEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.state)?;
        state.endpoints.push(Endpoint {
            prefixes: Vec::new(),
            events: tx,
        });
        let face = MemoryFace {
            id: state.endpoints.len() - 1,
            state: Arc::clone(&self.state),
        };
        Ok((face, rx))
    }

    /// Number of requests currently awaiting a response or timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the hub lock is poisoned.
    pub fn pending_requests(&self) -> Result<usize> {
        Ok(lock(&self.state)?.pending.len())
    }
}

/// One node's attachment to a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryFace {
    id: usize,
    state: Arc<Mutex<HubState>>,
}

impl PullTransport for MemoryFace {
    fn register_prefix(&self, prefix: Name) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = lock(&self.state)?;
            let endpoint = state
                .endpoints
                .get_mut(self.id)
                .ok_or_else(|| AppError::Transport(format!("face {} is not attached", self.id)))?;
            debug!(face = self.id, %prefix, "prefix registered");
            endpoint.prefixes.push(prefix);
            Ok(())
        })
    }

    fn express(&self, request: OutgoingRequest) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| AppError::Transport(format!("no runtime for request timer: {err}")))?;

        let pending_id = {
            let mut state = lock(&self.state)?;
            let target = state.route(self.id, &request.name);
            let pending_id = state.next_pending_id;
            state.next_pending_id += 1;

            trace!(face = self.id, name = %request.name, ?target, "request routed");
            if let Some(target) = target {
                state.notify(
                    target,
                    TransportEvent::Request {
                        name: request.name.clone(),
                    },
                );
            }
            state.pending.insert(
                pending_id,
                PendingEntry {
                    origin: self.id,
                    target,
                    request: request.clone(),
                },
            );
            pending_id
        };

        let hub = Arc::clone(&self.state);
        runtime.spawn(async move {
            tokio::time::sleep(request.lifetime).await;
            let Ok(mut state) = hub.lock() else {
                return;
            };
            if let Some(entry) = state.pending.remove(&pending_id) {
                state.notify(
                    entry.origin,
                    TransportEvent::Timeout {
                        request: entry.request,
                    },
                );
            }
        });

        Ok(())
    }

    fn respond(&self, name: &Name, payload: Bytes, _freshness: Duration) -> Result<()> {
        let mut state = lock(&self.state)?;
        let satisfied: Vec<u64> = state
            .pending
            .iter()
            .filter(|(_, entry)| entry.target == Some(self.id) && entry.request.name == *name)
            .map(|(id, _)| *id)
            .collect();

        if satisfied.is_empty() {
            debug!(face = self.id, %name, "unsolicited response dropped");
            return Ok(());
        }

        for id in satisfied {
            if let Some(entry) = state.pending.remove(&id) {
                state.notify(
                    entry.origin,
                    TransportEvent::Response {
                        request: entry.request,
                        payload: payload.clone(),
                    },
                );
            }
        }
        Ok(())
    }
}

fn lock(state: &Mutex<HubState>) -> Result<MutexGuard<'_, HubState>> {
    state
        .lock()
        .map_err(|_| AppError::Transport("memory hub lock poisoned".into()))
}
