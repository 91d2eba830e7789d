//! End-to-end handler flows through the registry.
//!
//! Each test drives the full parse → validate → process → build_response
//! sequence the dispatch loop performs for one frame.

mod common;

use devgate_core::{DeviceType, Manufacturer};
use devgate_protocol::{
    ChannelSink, MessageType, ParseErrorCode, ProcessErrorCode, ProtocolHandler, VALIDATION_FAILED,
};

#[test]
fn test_open_door_scenario() {
    let registry = common::registry();
    let handler = registry
        .get_for_device(DeviceType::AccessController, &Manufacturer::new("Entropy"))
        .unwrap();
    let (sink, mut rx) = ChannelSink::channel(8);

    let frame = common::open_door_frame(42);
    let msg = handler.parse_bytes(&frame).unwrap();
    assert_eq!(msg.message_type, MessageType::DoorControl);
    assert_eq!(msg.command, "open-door");
    assert_eq!(msg.device_code, common::ACCESS_SN);
    assert_eq!(msg.sequence, Some(42));
    assert!(handler.validate(&msg));

    handler
        .process(&msg, &common::device(common::ACCESS_SN), &sink)
        .unwrap();
    let event = rx.try_recv().unwrap();
    assert_eq!(event.device_id.as_str(), common::ACCESS_SN);
    assert_eq!(event.command(), "open-door");
    assert!(rx.try_recv().is_err(), "processed exactly once");

    let ack = handler.build_response(&msg, true, "", "");
    let ack = handler.parse_bytes(&ack).unwrap();
    assert_eq!(ack.message_type, MessageType::Ack);
    assert_eq!(ack.device_code, msg.device_code);
    assert_eq!(ack.sequence, msg.sequence);
    assert_eq!(ack.command_code, msg.command_code);
}

#[test]
fn test_every_sample_flows_through_its_handler() {
    let registry = common::registry();
    let (sink, mut rx) = ChannelSink::channel(16);

    for (protocol, frame) in common::well_formed_samples() {
        let handler = registry.get(protocol).unwrap();
        let msg = handler.parse_bytes(&frame).unwrap();
        assert_eq!(msg.protocol_type.as_str(), protocol);
        assert!(handler.validate(&msg), "{protocol} sample must validate");
        handler
            .process(&msg, &common::device("DEV"), &sink)
            .unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.message.protocol_type.as_str(), protocol);
    }
}

#[test]
fn test_malformed_frame_never_reaches_sink() {
    let registry = common::registry();
    let handler = registry.get("ACCESS_ENTROPY_V4.8").unwrap();
    let (_sink, mut rx) = ChannelSink::channel(1);

    let mut frame = common::open_door_frame(7).to_vec();
    let last = frame.len() - 1;
    frame[last] ^= 0xFF;

    let err = handler.parse_bytes(&frame).unwrap_err();
    assert_eq!(err.code, ParseErrorCode::ChecksumMismatch);
    assert_eq!(err.raw.as_ref(), frame.as_slice());
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_full_sink_becomes_downstream_rejection() {
    let registry = common::registry();
    let handler = registry.get("CONSUME_ZKTECO_V1.0").unwrap();
    let (sink, _rx) = ChannelSink::channel(1);
    let device = common::device(common::POS_ID);

    let first = handler.parse_bytes(&common::consume_frame(1, 500)).unwrap();
    let second = handler.parse_bytes(&common::consume_frame(2, 700)).unwrap();
    handler.process(&first, &device, &sink).unwrap();
    let err = handler.process(&second, &device, &sink).unwrap_err();
    assert_eq!(err.code, ProcessErrorCode::DownstreamRejected);

    let nak = handler.build_response(&second, false, err.code.as_str(), &err.message);
    let nak = handler.parse_bytes(&nak).unwrap();
    assert_eq!(nak.message_type, MessageType::Nak);
    assert_eq!(nak.sequence, Some(2));
    assert_eq!(nak.fields.get_u64("error_code"), Some(3));
}

#[test]
fn test_zero_amount_fails_validation() {
    let registry = common::registry();
    let handler = registry.get("CONSUME_ZKTECO_V1.0").unwrap();
    let msg = handler.parse_bytes(&common::consume_frame(5, 0)).unwrap();
    assert!(!handler.validate(&msg));

    let nak = handler.build_response(&msg, false, VALIDATION_FAILED, "amount must be positive");
    let nak = handler.parse_bytes(&nak).unwrap();
    assert_eq!(nak.message_type, MessageType::Nak);
    assert_eq!(nak.fields.get_u64("error_code"), Some(1));
}

#[test]
fn test_hex_input_matches_binary_input() {
    let registry = common::registry();
    let handler = registry.get("RS485_MODBUS_V1.0").unwrap();
    let frame = common::modbus_read(0x11);
    let spaced: Vec<String> = frame.iter().map(|b| format!("{b:02X}")).collect();
    let from_text = handler.parse_str(&spaced.join(" ")).unwrap();
    let from_bytes = handler.parse_bytes(&frame).unwrap();
    assert_eq!(from_text.raw, from_bytes.raw);
    assert_eq!(from_text.fields, from_bytes.fields);
}
