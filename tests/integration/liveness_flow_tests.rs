//! Liveness behavior when one side of a session goes away.

use midi_relay::models::message::MidiMessage;
use midi_relay::session::responder::EnqueueOutcome;

use super::test_helpers::{fast_config, start_pair, wait_connected, wait_for_session, PRODUCER};

#[tokio::test]
async fn controller_disconnects_when_playback_stops_answering() {
    let pair = start_pair(&fast_config()).await;
    wait_connected(&pair).await;

    pair.playback.stop().await;

    wait_for_session(
        pair.controller.node.served_sessions(),
        PRODUCER,
        "controller to mark the session disconnected",
        |session| session.is_some_and(|s| !s.connected),
    )
    .await;

    let outcome = pair
        .controller
        .node
        .responder()
        .enqueue_outbound(PRODUCER, MidiMessage::new(144, 60, 100))
        .await;
    assert_eq!(outcome, EnqueueOutcome::Discarded);
    let session = pair
        .controller
        .node
        .served_sessions()
        .get(PRODUCER)
        .await
        .unwrap();
    assert!(session.backlog.is_empty());

    pair.controller.stop().await;
}

#[tokio::test]
async fn playback_forgets_silent_producer() {
    let pair = start_pair(&fast_config()).await;
    wait_for_session(
        pair.playback.node.pulled_sessions(),
        PRODUCER,
        "playback to accept the producer",
        |session| session.is_some(),
    )
    .await;

    pair.controller.stop().await;

    wait_for_session(
        pair.playback.node.pulled_sessions(),
        PRODUCER,
        "inactivity sweep to remove the producer",
        |session| session.is_none(),
    )
    .await;

    pair.playback.stop().await;
}

#[tokio::test]
async fn heartbeats_keep_idle_session_alive() {
    let pair = start_pair(&fast_config()).await;
    wait_connected(&pair).await;

    // Well past six sweep periods with no data traffic.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    assert!(pair.playback.node.pulled_sessions().contains(PRODUCER).await);
    let served = pair
        .controller
        .node
        .served_sessions()
        .get(PRODUCER)
        .await
        .unwrap();
    assert!(served.connected);

    pair.controller.stop().await;
    pair.playback.stop().await;
}
