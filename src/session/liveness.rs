//! Heartbeat probing and inactivity sweeping.
//!
//! The two timers run on opposite ends of a session. The producer probes
//! the consumer with heartbeat requests and demotes the session to
//! disconnected once too many go unanswered. The consumer counts sweep
//! ticks since it last heard from each remote and forgets remotes that
//! have gone quiet for too long. Either end can go silent, so both exist.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::table::SessionTable;
use crate::config::GlobalConfig;
use crate::models::name::Namespace;
use crate::transport::{OutgoingRequest, PullTransport, RequestPurpose};

/// Result of feeding a heartbeat answer to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// The session was already connected; its miss counter was reset.
    Alive,
    /// The session (re)connected with fresh, empty backlogs.
    Connected,
    /// No session for the remote.
    UnknownRemote,
}

/// Periodic liveness checks over a [`SessionTable`].
pub struct LivenessMonitor {
    namespace: Namespace,
    transport: Arc<dyn PullTransport>,
    heartbeat_period: Duration,
    sweep_period: Duration,
    max_heartbeat_probe: u32,
    max_inactive_ticks: u32,
}

impl LivenessMonitor {
    /// Build a monitor with limits and periods from `config`.
    #[must_use]
    pub fn new(config: &GlobalConfig, namespace: Namespace, transport: Arc<dyn PullTransport>) -> Self {
        Self {
            namespace,
            transport,
            heartbeat_period: config.timers.heartbeat_period(),
            sweep_period: config.timers.sweep_period(),
            max_heartbeat_probe: config.session.max_heartbeat_probe,
            max_inactive_ticks: config.session.max_inactive_ticks,
        }
    }

    /// One heartbeat tick: count a miss for every session, probe it, and
    /// disconnect sessions that exceeded the probe limit.
    ///
    /// Returns the ids of sessions that were disconnected on this tick.
    pub async fn heartbeat_once(&self, table: &SessionTable) -> Vec<String> {
        let max_probe = self.max_heartbeat_probe;
        let mut probes = Vec::new();
        let mut demoted = Vec::new();

        table
            .for_each(|remote_id, session| {
                session.heartbeat_misses += 1;
                probes.push((remote_id.to_owned(), session.heartbeat_misses));
                if session.heartbeat_misses > max_probe && session.connected {
                    session.connected = false;
                    session.backlog.clear();
                    demoted.push(remote_id.to_owned());
                }
            })
            .await;

        for (remote_id, misses) in probes {
            let request = OutgoingRequest {
                name: self.namespace.heartbeat_name(&remote_id).name().clone(),
                lifetime: self.heartbeat_period,
                must_be_fresh: true,
                purpose: RequestPurpose::Heartbeat {
                    remote_id: remote_id.clone(),
                },
            };
            debug!(remote = %remote_id, misses, "heartbeat");
            if let Err(err) = self.transport.express(request) {
                warn!(remote = %remote_id, %err, "heartbeat not sent");
            }
        }

        demoted.sort();
        for remote_id in &demoted {
            warn!(remote = %remote_id, "heartbeat failed, resetting connection");
        }
        demoted
    }

    /// Record a heartbeat answer for `remote_id`.
    pub async fn on_heartbeat_response(&self, table: &SessionTable, remote_id: &str) -> HeartbeatOutcome {
        let outcome = table
            .update(remote_id, |session| {
                session.heartbeat_misses = 0;
                session.touch();
                if session.connected {
                    return HeartbeatOutcome::Alive;
                }
                session.connected = true;
                session.backlog.clear();
                session.expected_next = 0;
                HeartbeatOutcome::Connected
            })
            .await
            .unwrap_or(HeartbeatOutcome::UnknownRemote);

        match outcome {
            HeartbeatOutcome::Alive => debug!(remote = remote_id, "heartbeat answered"),
            HeartbeatOutcome::Connected => info!(remote = remote_id, "connection established"),
            HeartbeatOutcome::UnknownRemote => {
                debug!(remote = remote_id, "heartbeat answer for unknown session");
            }
        }
        outcome
    }

    /// One sweep tick: age every session and remove those inactive for more
    /// than the configured number of ticks.
    ///
    /// Returns the removed remote ids.
    pub async fn sweep_once(&self, table: &SessionTable) -> Vec<String> {
        let max_inactive = self.max_inactive_ticks;
        let removed = table
            .remove_where(|session| {
                session.inactivity_ticks += 1;
                session.inactivity_ticks > max_inactive
            })
            .await;
        for remote_id in &removed {
            info!(remote = %remote_id, "no heartbeat for too long, deleting session");
        }
        removed
    }

    /// Spawn the periodic heartbeat task over `table`.
    #[must_use]
    pub fn spawn_heartbeat_task(
        self: Arc<Self>,
        table: Arc<SessionTable>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let period = self.heartbeat_period;
        tokio::spawn(
            async move {
                // First probe fires immediately.
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            info!("heartbeat task shutting down");
                            break;
                        }
                        _ = interval.tick() => {
                            self.heartbeat_once(&table).await;
                        }
                    }
                }
            }
            .instrument(info_span!("heartbeat")),
        )
    }

    /// Spawn the periodic inactivity sweep over `table`.
    #[must_use]
    pub fn spawn_sweep_task(self: Arc<Self>, table: Arc<SessionTable>, cancel: CancellationToken) -> JoinHandle<()> {
        let period = self.sweep_period;
        tokio::spawn(
            async move {
                let mut interval = interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            info!("sweep task shutting down");
                            break;
                        }
                        _ = interval.tick() => {
                            self.sweep_once(&table).await;
                        }
                    }
                }
            }
            .instrument(info_span!("inactivity_sweep")),
        )
    }
}
