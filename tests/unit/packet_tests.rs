use midi_relay::transport::packet::{content_digest, Packet, MAX_DATAGRAM_BYTES};
use midi_relay::AppError;

#[test]
fn signed_response_decodes() {
    let packet = Packet::signed_response("/topo-prefix/a/midi-ndn/jam/0".into(), vec![144, 64, 90], 1000);

    let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();

    assert_eq!(decoded, packet);
}

#[test]
fn request_wire_form_is_tagged_json() {
    let packet = Packet::Request {
        name: "/topo-prefix/a/midi-ndn/jam/heartbeat".into(),
        lifetime_ms: 1000,
        must_be_fresh: true,
    };

    let json: serde_json::Value = serde_json::from_slice(&packet.encode().unwrap()).unwrap();

    assert_eq!(json["type"], "request");
    assert_eq!(json["lifetime_ms"], 1000);
}

#[test]
fn must_be_fresh_defaults_to_false() {
    let raw = br#"{"type":"request","name":"/x","lifetime_ms":5}"#;

    let packet = Packet::decode(raw).unwrap();

    assert!(matches!(packet, Packet::Request { must_be_fresh: false, .. }));
}

#[test]
fn tampered_content_fails_verification() {
    let Packet::Response { name, freshness_ms, digest, .. } =
        Packet::signed_response("/x/0".into(), vec![1, 2, 3], 1000)
    else {
        panic!("expected response");
    };
    let tampered = Packet::Response {
        name,
        content: vec![1, 2, 4],
        freshness_ms,
        digest,
    };

    let err = Packet::decode(&tampered.encode().unwrap()).unwrap_err();

    assert!(matches!(err, AppError::Protocol(_)));
}

#[test]
fn digest_binds_name_to_content() {
    assert_ne!(content_digest("/a/1", b"x"), content_digest("/a/2", b"x"));
    assert_ne!(content_digest("/a", b"1x"), content_digest("/a1", b"x"));
    assert_eq!(content_digest("/a/1", b"x").len(), 64);
}

#[test]
fn garbage_is_transport_error() {
    assert!(matches!(Packet::decode(b"\x00\x01"), Err(AppError::Transport(_))));
}

#[test]
fn oversized_packet_is_rejected() {
    let packet = Packet::signed_response("/x/0".into(), vec![255; MAX_DATAGRAM_BYTES], 1000);

    assert!(matches!(packet.encode(), Err(AppError::Transport(msg)) if msg.contains("too large")));
}
