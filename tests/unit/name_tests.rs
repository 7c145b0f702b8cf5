use midi_relay::models::name::{Name, NameKind, Namespace};
use midi_relay::AppError;

fn namespace() -> Namespace {
    Namespace::new("/topo-prefix", "midi-ndn", "jam").unwrap()
}

#[test]
fn name_parses_and_displays() {
    let name: Name = "/a//b/c/".parse().unwrap();

    assert_eq!(name.components(), ["a", "b", "c"]);
    assert_eq!(name.to_string(), "/a/b/c");
    assert_eq!("/".parse::<Name>().unwrap().to_string(), "/");
    assert!("/".parse::<Name>().unwrap().is_empty());
}

#[test]
fn relative_name_is_rejected() {
    assert!(matches!("a/b".parse::<Name>(), Err(AppError::Name(_))));
}

#[test]
fn prefix_match_is_component_wise() {
    let name: Name = "/topo-prefix/alice/midi-ndn".parse().unwrap();

    assert!(name.starts_with(&"/topo-prefix".parse().unwrap()));
    assert!(name.starts_with(&"/".parse().unwrap()));
    assert!(!name.starts_with(&"/topo".parse().unwrap()));
}

#[test]
fn data_and_heartbeat_names_follow_layout() {
    let ns = namespace();

    assert_eq!(ns.data_name("alice", 7).to_string(), "/topo-prefix/alice/midi-ndn/jam/7");
    assert_eq!(
        ns.heartbeat_name("alice").to_string(),
        "/topo-prefix/alice/midi-ndn/jam/heartbeat"
    );
    assert_eq!(ns.stream_prefix("alice").to_string(), "/topo-prefix/alice/midi-ndn/jam");
}

#[test]
fn parse_recovers_peer_and_kind() {
    let ns = namespace();

    let data = ns
        .parse(&"/topo-prefix/alice/midi-ndn/jam/42".parse().unwrap())
        .unwrap();
    assert_eq!(data.peer, "alice");
    assert_eq!(data.kind, NameKind::Sequence(42));
    assert_eq!(data.seq(), Some(42));

    let heartbeat = ns
        .parse(&"/topo-prefix/alice/midi-ndn/jam/heartbeat".parse().unwrap())
        .unwrap();
    assert!(heartbeat.is_heartbeat());
    assert_eq!(heartbeat.seq(), None);
    assert_eq!(heartbeat, ns.heartbeat_name("alice"));
}

#[test]
fn parse_rejects_foreign_or_malformed_names() {
    let ns = namespace();
    let rejected = [
        "/other/alice/midi-ndn/jam/1",
        "/topo-prefix/alice/midi-ndn/jam",
        "/topo-prefix/alice/midi-ndn/jam/1/extra",
        "/topo-prefix/alice/other-stream/jam/1",
        "/topo-prefix/alice/midi-ndn/other-proj/1",
        "/topo-prefix/alice/midi-ndn/jam/seven",
        "/topo-prefix/alice/midi-ndn/jam/-1",
    ];

    for raw in rejected {
        let name: Name = raw.parse().unwrap();
        assert!(matches!(ns.parse(&name), Err(AppError::Name(_))), "{raw}");
    }
}

#[test]
fn namespace_rejects_bad_components() {
    assert!(Namespace::new("topo", "midi-ndn", "jam").is_err());
    assert!(Namespace::new("/topo", "", "jam").is_err());
    assert!(Namespace::new("/topo", "midi-ndn", "a/b").is_err());
}

#[test]
fn multi_component_prefix_is_supported() {
    let ns = Namespace::new("/studio/net", "midi-ndn", "jam").unwrap();
    let name = ns.data_name("bob", 3);

    assert_eq!(name.to_string(), "/studio/net/bob/midi-ndn/jam/3");
    assert_eq!(ns.parse(name.name()).unwrap(), name);
}
