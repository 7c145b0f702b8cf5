//! Unit tests for the consumer-side windowed puller.
//!
//! Covers prewarm on first contact, window advance by batch size,
//! rejection of stale / unrequested / malformed responses, termination,
//! and the handshake answer.

use std::sync::Arc;

use midi_relay::device::ChannelSink;
use midi_relay::models::message::MidiMessage;
use midi_relay::models::name::Namespace;
use midi_relay::session::puller::{Acceptance, ResponseOutcome, WindowedPuller, HANDSHAKE_ACCEPTED};
use midi_relay::session::table::SessionTable;
use midi_relay::transport::RequestPurpose;
use tokio::sync::mpsc;

use super::recording_transport::{test_config, RecordingTransport};

struct Fixture {
    puller: WindowedPuller,
    table: Arc<SessionTable>,
    transport: Arc<RecordingTransport>,
    delivered: mpsc::UnboundedReceiver<(String, MidiMessage)>,
    namespace: Namespace,
}

fn fixture() -> Fixture {
    let config = test_config();
    let namespace = Namespace::from_config(&config).unwrap();
    let table = Arc::new(SessionTable::new());
    let transport = Arc::new(RecordingTransport::default());
    let (sink, delivered) = ChannelSink::new();
    let puller = WindowedPuller::new(
        &config,
        namespace.clone(),
        Arc::clone(&table),
        transport.clone(),
        Arc::new(sink),
    );
    Fixture {
        puller,
        table,
        transport,
        delivered,
        namespace,
    }
}

const NOTE_ON: [u8; 3] = [144, 64, 90];

#[tokio::test]
async fn accept_new_remote_prewarms_window() {
    let fx = fixture();

    let acceptance = fx.puller.accept("peerA").await;

    assert_eq!(acceptance, Acceptance::New);
    assert_eq!(fx.transport.data_seqs(), vec![0, 1, 2, 3, 4]);
    let session = fx.table.get("peerA").await.expect("session created");
    assert_eq!(session.min_seq, 0);
    assert_eq!(session.max_seq, 5);
    assert!(session.connected);
}

#[tokio::test]
async fn prewarm_requests_use_data_names_and_long_lifetime() {
    let fx = fixture();
    fx.puller.accept("peerA").await;

    let first = &fx.transport.expressed()[0];
    assert_eq!(first.name, *fx.namespace.data_name("peerA", 0).name());
    assert_eq!(first.name.to_string(), "/topo-prefix/peerA/midi-ndn/jam/0");
    assert_eq!(first.lifetime.as_secs(), 3600);
    assert!(first.must_be_fresh);
    assert_eq!(
        first.purpose,
        RequestPurpose::Data {
            remote_id: "peerA".into(),
            seq: 0
        }
    );
}

#[tokio::test]
async fn accept_known_remote_is_heartbeat() {
    let fx = fixture();
    fx.puller.accept("peerA").await;
    fx.table
        .update("peerA", |session| session.inactivity_ticks = 4)
        .await;
    fx.transport.clear();

    let acceptance = fx.puller.accept("peerA").await;

    assert_eq!(acceptance, Acceptance::Heartbeat);
    assert!(fx.transport.expressed().is_empty(), "no second prewarm");
    let session = fx.table.get("peerA").await.unwrap();
    assert_eq!(session.inactivity_ticks, 0);
    assert_eq!(session.max_seq, 5);
}

#[tokio::test]
async fn response_advances_window_by_acknowledged_span() {
    let mut fx = fixture();
    fx.puller.accept("peerA").await;
    fx.transport.clear();

    let outcome = fx.puller.on_response("peerA", 2, &NOTE_ON).await;

    assert_eq!(outcome, ResponseOutcome::Accepted { advance: 3 });
    let session = fx.table.get("peerA").await.unwrap();
    assert_eq!(session.min_seq, 3);
    assert_eq!(session.max_seq, 8);
    assert_eq!(fx.transport.data_seqs(), vec![5, 6, 7]);

    let (remote, message) = fx.delivered.try_recv().expect("message delivered");
    assert_eq!(remote, "peerA");
    assert_eq!(message, MidiMessage::from(NOTE_ON));
}

#[tokio::test]
async fn stale_response_is_dropped_without_side_effects() {
    let mut fx = fixture();
    fx.puller.accept("peerA").await;
    fx.puller.on_response("peerA", 2, &NOTE_ON).await;
    let _ = fx.delivered.try_recv();
    let before = fx.table.get("peerA").await.unwrap();
    fx.transport.clear();

    let outcome = fx.puller.on_response("peerA", 0, &[1, 2, 3]).await;

    assert_eq!(outcome, ResponseOutcome::Stale);
    assert_eq!(fx.table.get("peerA").await.unwrap(), before);
    assert!(fx.transport.expressed().is_empty());
    assert!(fx.delivered.try_recv().is_err(), "stale payload not delivered");
}

#[tokio::test]
async fn response_beyond_window_is_dropped() {
    let fx = fixture();
    fx.puller.accept("peerA").await;
    let before = fx.table.get("peerA").await.unwrap();

    let outcome = fx.puller.on_response("peerA", 5, &NOTE_ON).await;

    assert_eq!(outcome, ResponseOutcome::Unrequested);
    assert_eq!(fx.table.get("peerA").await.unwrap(), before);
}

#[tokio::test]
async fn response_for_unknown_remote_is_dropped() {
    let fx = fixture();

    let outcome = fx.puller.on_response("ghost", 0, &NOTE_ON).await;

    assert_eq!(outcome, ResponseOutcome::UnknownRemote);
    assert!(fx.transport.expressed().is_empty());
    assert!(fx.table.is_empty().await);
}

#[tokio::test]
async fn malformed_payload_leaves_window_untouched() {
    let mut fx = fixture();
    fx.puller.accept("peerA").await;
    let before = fx.table.get("peerA").await.unwrap();

    let outcome = fx.puller.on_response("peerA", 0, &[144, 64]).await;

    assert_eq!(outcome, ResponseOutcome::Malformed);
    assert_eq!(fx.table.get("peerA").await.unwrap(), before);
    assert!(fx.delivered.try_recv().is_err());
}

#[tokio::test]
async fn batched_payload_is_delivered_in_order() {
    let mut fx = fixture();
    fx.puller.accept("peerA").await;

    let outcome = fx
        .puller
        .on_response("peerA", 0, &[144, 64, 90, 128, 64, 0])
        .await;

    assert_eq!(outcome, ResponseOutcome::Accepted { advance: 1 });
    assert_eq!(fx.delivered.try_recv().unwrap().1, MidiMessage::new(144, 64, 90));
    assert_eq!(fx.delivered.try_recv().unwrap().1, MidiMessage::new(128, 64, 0));
}

#[tokio::test]
async fn termination_removes_session_and_stops_pulling() {
    let mut fx = fixture();
    fx.puller.accept("peerA").await;
    fx.transport.clear();

    let outcome = fx.puller.on_response("peerA", 0, &[0, 0, 0]).await;

    assert_eq!(outcome, ResponseOutcome::Terminated);
    assert!(!fx.table.contains("peerA").await);
    assert!(fx.transport.expressed().is_empty());
    assert_eq!(fx.delivered.try_recv().unwrap().1, MidiMessage::TERMINATION);

    // Late responses for the removed session are unknown now.
    assert_eq!(
        fx.puller.on_response("peerA", 1, &NOTE_ON).await,
        ResponseOutcome::UnknownRemote
    );
}

#[tokio::test]
async fn termination_inside_batch_stops_after_sentinel() {
    let mut fx = fixture();
    fx.puller.accept("peerA").await;

    let outcome = fx
        .puller
        .on_response("peerA", 0, &[144, 64, 90, 0, 0, 0, 128, 64, 0])
        .await;

    assert_eq!(outcome, ResponseOutcome::Terminated);
    assert_eq!(fx.delivered.try_recv().unwrap().1, MidiMessage::new(144, 64, 90));
    assert_eq!(fx.delivered.try_recv().unwrap().1, MidiMessage::TERMINATION);
    assert!(fx.delivered.try_recv().is_err(), "nothing after the sentinel");
}

#[tokio::test]
async fn window_edges_stay_ordered_under_mixed_responses() {
    let fx = fixture();
    fx.puller.accept("peerA").await;

    let mut last_min = 0;
    for seq in [1, 0, 4, 3, 4, 9, 7, 2, 12, 11, 30, 13] {
        fx.puller.on_response("peerA", seq, &NOTE_ON).await;
        let session = fx.table.get("peerA").await.unwrap();
        assert!(session.min_seq >= last_min, "min_seq went backwards");
        assert!(session.min_seq <= session.max_seq, "min_seq passed max_seq");
        last_min = session.min_seq;
    }
}

#[tokio::test]
async fn request_timeout_is_not_retransmitted() {
    let fx = fixture();
    fx.puller.accept("peerA").await;
    fx.transport.clear();

    fx.puller.on_request_timeout("peerA", 0);

    assert!(fx.transport.expressed().is_empty());
    assert_eq!(fx.table.get("peerA").await.unwrap().max_seq, 5);
}

#[tokio::test]
async fn handshake_is_answered_and_prewarms() {
    let fx = fixture();
    let heartbeat = fx.namespace.heartbeat_name("peerA");

    let acceptance = fx.puller.on_handshake(&heartbeat).await.unwrap();

    assert_eq!(acceptance, Acceptance::New);
    let responses = fx.transport.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].0, *heartbeat.name());
    assert_eq!(&responses[0].1[..], HANDSHAKE_ACCEPTED);
    assert_eq!(fx.transport.data_seqs().len(), 5);

    // A repeated handshake is answered but does not prewarm again.
    let again = fx.puller.on_handshake(&heartbeat).await.unwrap();
    assert_eq!(again, Acceptance::Heartbeat);
    assert_eq!(fx.transport.responses().len(), 2);
    assert_eq!(fx.transport.data_seqs().len(), 5);
}
