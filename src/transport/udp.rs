//! UDP face talking to one upstream peer.
//!
//! Every request is sent to the configured upstream address. Inbound
//! requests are accepted only under registered prefixes and remembered so
//! [`respond`](PullTransport::respond) can send the answer back to whoever
//! asked. Outstanding requests time out locally after their lifetime, and
//! remembered requesters are forgotten once the lifetime they announced
//! (capped at [`MAX_INBOUND_LIFETIME`]) runs out.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use super::packet::{Packet, MAX_DATAGRAM_BYTES};
use super::{OutgoingRequest, PullTransport, TransportEvent};
use crate::models::name::Name;
use crate::{AppError, Result};

/// Longest time an inbound requester is remembered.
pub const MAX_INBOUND_LIFETIME: Duration = Duration::from_secs(3600);

struct Requester {
    id: u64,
    from: SocketAddr,
}

#[derive(Default)]
struct FaceState {
    prefixes: Vec<Name>,
    outstanding: HashMap<u64, OutgoingRequest>,
    next_request_id: u64,
    inbound: HashMap<Name, Vec<Requester>>,
    next_inbound_id: u64,
}

impl FaceState {
    fn forget_requester(&mut self, name: &Name, id: u64) -> bool {
        let Some(requesters) = self.inbound.get_mut(name) else {
            return false;
        };
        let before = requesters.len();
        requesters.retain(|requester| requester.id != id);
        let removed = requesters.len() != before;
        if requesters.is_empty() {
            self.inbound.remove(name);
        }
        removed
    }
}

/// Datagram transport bound to a local socket.
pub struct UdpFace {
    socket: Arc<UdpSocket>,
    upstream: SocketAddr,
    state: Arc<Mutex<FaceState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl UdpFace {
    /// Bind the local socket and spawn the receive loop.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the socket cannot be bound.
    pub async fn bind(
        local: SocketAddr,
        upstream: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>, JoinHandle<()>)> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|err| AppError::Transport(format!("failed to bind {local}: {err}")))?;
        let local = socket.local_addr()?;
        info!(%local, %upstream, "udp face bound");

        let (tx, rx) = mpsc::unbounded_channel();
        let face = Arc::new(Self {
            socket: Arc::new(socket),
            upstream,
            state: Arc::new(Mutex::new(FaceState::default())),
            events: tx,
        });

        let reader = Arc::clone(&face);
        let handle = tokio::spawn(
            async move { reader.receive_loop(cancel).await }
                .instrument(info_span!("udp_face", %local)),
        );

        Ok((face, rx, handle))
    }

    /// Address the socket is actually bound to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the socket cannot report its address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Number of inbound requests still waiting for an answer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the face lock is poisoned.
    pub fn pending_inbound(&self) -> Result<usize> {
        Ok(lock(&self.state)?.inbound.values().map(Vec::len).sum())
    }

    async fn receive_loop(&self, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("udp face shutting down");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => {
                        if let Err(err) = self.handle_datagram(&buf[..len], from) {
                            warn!(%from, %err, "datagram dropped");
                        }
                    }
                    Err(err) => warn!(%err, "udp receive failed"),
                },
            }
        }
    }

    fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) -> Result<()> {
        match Packet::decode(datagram)? {
            Packet::Request { name, lifetime_ms, .. } => {
                let name: Name = name.parse()?;
                let id = {
                    let mut state = lock(&self.state)?;
                    if !state.prefixes.iter().any(|prefix| name.starts_with(prefix)) {
                        trace!(%name, "request outside registered prefixes");
                        return Ok(());
                    }
                    let id = state.next_inbound_id;
                    state.next_inbound_id += 1;
                    state
                        .inbound
                        .entry(name.clone())
                        .or_default()
                        .push(Requester { id, from });
                    id
                };
                self.expire_requester(name.clone(), id, lifetime_ms);
                let _ = self.events.send(TransportEvent::Request { name });
            }
            Packet::Response { name, content, .. } => {
                let name: Name = name.parse()?;
                let mut state = lock(&self.state)?;
                let satisfied: Vec<u64> = state
                    .outstanding
                    .iter()
                    .filter(|(_, request)| request.name == name)
                    .map(|(id, _)| *id)
                    .collect();
                if satisfied.is_empty() {
                    debug!(%name, "unsolicited response dropped");
                }
                let payload = Bytes::from(content);
                for id in satisfied {
                    if let Some(request) = state.outstanding.remove(&id) {
                        let _ = self.events.send(TransportEvent::Response {
                            request,
                            payload: payload.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Forget requester `id` for `name` once its lifetime has passed.
    fn expire_requester(&self, name: Name, id: u64, lifetime_ms: u64) {
        let lifetime = Duration::from_millis(lifetime_ms).min(MAX_INBOUND_LIFETIME);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::time::sleep(lifetime).await;
            if let Ok(mut guard) = state.lock() {
                if guard.forget_requester(&name, id) {
                    trace!(%name, "inbound request expired unanswered");
                }
            }
        });
    }

    fn send(&self, packet: &Packet, to: SocketAddr) -> Result<()> {
        let bytes = packet.encode()?;
        self.socket
            .try_send_to(&bytes, to)
            .map_err(|err| AppError::Transport(format!("send to {to} failed: {err}")))?;
        Ok(())
    }
}

impl PullTransport for UdpFace {
    fn register_prefix(&self, prefix: Name) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            info!(%prefix, "prefix registered");
            lock(&self.state)?.prefixes.push(prefix);
            Ok(())
        })
    }

    fn express(&self, request: OutgoingRequest) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| AppError::Transport(format!("no runtime for request timer: {err}")))?;

        let packet = Packet::Request {
            name: request.name.to_string(),
            lifetime_ms: u64::try_from(request.lifetime.as_millis()).unwrap_or(u64::MAX),
            must_be_fresh: request.must_be_fresh,
        };

        let request_id = {
            let mut state = lock(&self.state)?;
            let id = state.next_request_id;
            state.next_request_id += 1;
            state.outstanding.insert(id, request.clone());
            id
        };

        if let Err(err) = self.send(&packet, self.upstream) {
            lock(&self.state)?.outstanding.remove(&request_id);
            return Err(err);
        }

        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        runtime.spawn(async move {
            tokio::time::sleep(request.lifetime).await;
            let expired = match state.lock() {
                Ok(mut guard) => guard.outstanding.remove(&request_id),
                Err(_) => None,
            };
            if let Some(request) = expired {
                let _ = events.send(TransportEvent::Timeout { request });
            }
        });

        Ok(())
    }

    fn respond(&self, name: &Name, payload: Bytes, freshness: Duration) -> Result<()> {
        let requesters = lock(&self.state)?.inbound.remove(name).unwrap_or_default();
        if requesters.is_empty() {
            debug!(%name, "no requester waiting for response");
            return Ok(());
        }

        let packet = Packet::signed_response(
            name.to_string(),
            payload.to_vec(),
            u64::try_from(freshness.as_millis()).unwrap_or(u64::MAX),
        );
        for requester in requesters {
            self.send(&packet, requester.from)?;
        }
        Ok(())
    }
}

fn lock(state: &Mutex<FaceState>) -> Result<MutexGuard<'_, FaceState>> {
    state
        .lock()
        .map_err(|_| AppError::Transport("udp face lock poisoned".into()))
}
