use midi_relay::models::message::{join_payload, split_payload, MidiMessage, MESSAGE_LEN};
use midi_relay::AppError;

#[test]
fn termination_is_all_zero() {
    assert_eq!(MidiMessage::TERMINATION.as_bytes(), &[0; MESSAGE_LEN]);
    assert!(MidiMessage::TERMINATION.is_termination());
    assert!(!MidiMessage::new(0, 0, 1).is_termination());
}

#[test]
fn from_padded_pads_and_truncates() {
    assert_eq!(MidiMessage::from_padded(&[0xC0, 5]), MidiMessage::new(0xC0, 5, 0));
    assert_eq!(MidiMessage::from_padded(&[1, 2, 3, 4]), MidiMessage::new(1, 2, 3));
    assert!(MidiMessage::from_padded(&[]).is_termination());
}

#[test]
fn display_is_space_separated_decimal() {
    assert_eq!(MidiMessage::new(144, 64, 90).to_string(), "144 64 90");
}

#[test]
fn split_payload_yields_units_in_order() {
    let units = split_payload(&[144, 64, 90, 128, 64, 0]).unwrap();

    assert_eq!(units, vec![MidiMessage::new(144, 64, 90), MidiMessage::new(128, 64, 0)]);
}

#[test]
fn split_payload_rejects_partial_units() {
    for payload in [&[][..], &[1, 2][..], &[1, 2, 3, 4][..]] {
        let err = split_payload(payload).unwrap_err();
        assert!(matches!(err, AppError::Protocol(_)), "{payload:?}");
    }
}

#[test]
fn join_payload_concatenates() {
    let messages = [MidiMessage::new(144, 60, 100), MidiMessage::TERMINATION];

    let payload = join_payload(&messages);

    assert_eq!(&payload[..], &[144, 60, 100, 0, 0, 0]);
    assert_eq!(split_payload(&payload).unwrap(), messages.to_vec());
}
