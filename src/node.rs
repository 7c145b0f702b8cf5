//! A relay node: one transport, both protocol roles, and the tasks that
//! keep them running.
//!
//! A node answers handshakes and pulls remote streams (playback role) and
//! can serve its own stream to whoever pulls it (controller role). Each
//! role keeps its sessions in its own [`SessionTable`]: the inactivity
//! sweep runs over the pulled sessions and heartbeats go out for the
//! served ones.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::device::MessageSink;
use crate::models::name::{NameKind, Namespace};
use crate::session::liveness::LivenessMonitor;
use crate::session::puller::WindowedPuller;
use crate::session::responder::ResponderQueue;
use crate::session::table::SessionTable;
use crate::transport::{PullTransport, RequestPurpose, TransportEvent};
use crate::Result;

/// Session core wired to one transport.
pub struct Node {
    namespace: Namespace,
    transport: Arc<dyn PullTransport>,
    pulled: Arc<SessionTable>,
    served: Arc<SessionTable>,
    puller: Arc<WindowedPuller>,
    responder: Arc<ResponderQueue>,
    monitor: Arc<LivenessMonitor>,
}

impl Node {
    /// Build a node from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Name` if the configured namespace is invalid.
    pub fn new(
        config: &GlobalConfig,
        transport: Arc<dyn PullTransport>,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self> {
        let namespace = Namespace::from_config(config)?;
        let pulled = Arc::new(SessionTable::new());
        let served = Arc::new(SessionTable::new());

        let puller = Arc::new(WindowedPuller::new(
            config,
            namespace.clone(),
            Arc::clone(&pulled),
            Arc::clone(&transport),
            sink,
        ));
        let responder = Arc::new(ResponderQueue::new(
            config,
            Arc::clone(&served),
            Arc::clone(&transport),
        ));
        let monitor = Arc::new(LivenessMonitor::new(
            config,
            namespace.clone(),
            Arc::clone(&transport),
        ));

        Ok(Self {
            namespace,
            transport,
            pulled,
            served,
            puller,
            responder,
            monitor,
        })
    }

    /// Name layout shared by this node's requests.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Sessions for remote streams this node pulls.
    #[must_use]
    pub fn pulled_sessions(&self) -> &Arc<SessionTable> {
        &self.pulled
    }

    /// Sessions for streams this node serves.
    #[must_use]
    pub fn served_sessions(&self) -> &Arc<SessionTable> {
        &self.served
    }

    /// Consumer-side component.
    #[must_use]
    pub fn puller(&self) -> &Arc<WindowedPuller> {
        &self.puller
    }

    /// Producer-side component.
    #[must_use]
    pub fn responder(&self) -> &Arc<ResponderQueue> {
        &self.responder
    }

    /// Liveness component.
    #[must_use]
    pub fn monitor(&self) -> &Arc<LivenessMonitor> {
        &self.monitor
    }

    /// Whether `local_id`'s stream still has a connected served session.
    /// Once this turns false after the input has ended, nothing queued can
    /// reach the consumer any more.
    pub async fn serving(&self, local_id: &str) -> bool {
        self.served
            .get(local_id)
            .await
            .is_some_and(|session| session.connected)
    }

    /// Listen for handshakes from any producer under the topology prefix.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the prefix cannot be registered.
    pub async fn start_playback(&self) -> Result<()> {
        let prefix = self.namespace.topology_prefix().clone();
        self.transport.register_prefix(prefix.clone()).await?;
        info!(%prefix, "accepting connections");
        Ok(())
    }

    /// Serve `local_id`'s stream and start tracking its session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the stream prefix cannot be
    /// registered.
    pub async fn start_controller(&self, local_id: &str) -> Result<()> {
        let prefix = self.namespace.stream_prefix(local_id);
        self.transport.register_prefix(prefix.clone()).await?;
        self.responder.open(local_id).await;
        info!(%prefix, "serving stream");
        Ok(())
    }

    /// Route one transport event to the component that owns it. Failures
    /// are logged and never escape.
    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Request { name } => {
                let pull = match self.namespace.parse(&name) {
                    Ok(pull) => pull,
                    Err(err) => {
                        debug!(%name, %err, "request ignored");
                        return;
                    }
                };
                match pull.kind {
                    NameKind::Heartbeat => {
                        // Prewarm waits briefly; keep the event loop moving.
                        let puller = Arc::clone(&self.puller);
                        tokio::spawn(
                            async move {
                                if let Err(err) = puller.on_handshake(&pull).await {
                                    warn!(%err, "handshake answer failed");
                                }
                            }
                            .instrument(info_span!("handshake")),
                        );
                    }
                    NameKind::Sequence(seq) => {
                        self.responder
                            .on_request_arrived(&pull.peer, seq, pull.name())
                            .await;
                    }
                }
            }
            TransportEvent::Response { request, payload } => match request.purpose {
                RequestPurpose::Data { remote_id, seq } => {
                    self.puller.on_response(&remote_id, seq, &payload).await;
                }
                RequestPurpose::Heartbeat { remote_id } => {
                    self.monitor
                        .on_heartbeat_response(&self.served, &remote_id)
                        .await;
                }
            },
            TransportEvent::Timeout { request } => match request.purpose {
                RequestPurpose::Data { remote_id, seq } => {
                    self.puller.on_request_timeout(&remote_id, seq);
                }
                RequestPurpose::Heartbeat { remote_id } => {
                    debug!(remote = %remote_id, "heartbeat unanswered");
                }
            },
        }
    }

    /// Spawn the event loop, heartbeat timer, inactivity sweep and drain
    /// loop. All stop when `cancel` fires.
    #[must_use]
    pub fn spawn(
        self: &Arc<Self>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        vec![
            spawn_event_loop(Arc::clone(self), events, cancel.clone()),
            Arc::clone(&self.monitor).spawn_heartbeat_task(Arc::clone(&self.served), cancel.clone()),
            Arc::clone(&self.monitor).spawn_sweep_task(Arc::clone(&self.pulled), cancel.clone()),
            Arc::clone(&self.responder).spawn_drain_task(cancel.clone()),
        ]
    }
}

fn spawn_event_loop(
    node: Arc<Node>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("event loop shutting down");
                        break;
                    }
                    event = events.recv() => match event {
                        Some(event) => node.handle_event(event).await,
                        None => {
                            error!("transport event channel closed");
                            break;
                        }
                    },
                }
            }
        }
        .instrument(info_span!("node_events")),
    )
}
