use bytes::Bytes;

use crate::protocol::rtp::{
    AudioPacket, ControlPacket, RaopPayloadType, ResendRequest, ResendResponse, RtpDecodeError,
    SyncPacket,
};

#[test]
fn test_audio_packet_layout() {
    let data = Bytes::from_static(&[
        0x80, 0x60, 0x00, 0x01, // header, seq 1
        0x00, 0x00, 0x03, 0xE8, // timestamp 1000
        0x00, 0x00, 0x00, 0x2A, // ssrc 42
        0xDE, 0xAD, // payload
    ]);

    let packet = AudioPacket::decode(data).unwrap();
    assert_eq!(packet.sequence(), 1);
    assert_eq!(packet.timestamp(), 1000);
    assert_eq!(packet.ssrc(), 42);
    assert_eq!(packet.payload().as_ref(), &[0xDE, 0xAD]);
}

#[test]
fn test_audio_packet_ignores_payload_type() {
    // Retransmitted audio is often labelled with the wrong type
    let data = Bytes::from_static(&[
        0x00, 0xD6, 0x00, 0x07, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02,
    ]);
    let packet = AudioPacket::decode(data).unwrap();
    assert_eq!(packet.sequence(), 7);
    assert!(packet.payload().is_empty());
}

#[test]
fn test_audio_packet_truncated_sub_header() {
    let data = Bytes::from_static(&[0x80, 0x60, 0x00, 0x01, 0x00, 0x00, 0x00]);
    assert_eq!(
        AudioPacket::decode(data),
        Err(RtpDecodeError::BufferTooSmall { needed: 12, have: 7 })
    );
}

#[test]
fn test_audio_packet_encode_matches_decode() {
    let packet = AudioPacket::new(65535, 0xFFFF_FFFF, 7, vec![1, 2, 3]);
    let decoded = AudioPacket::decode(packet.encode()).unwrap();
    assert_eq!(decoded, packet);
}

#[test]
fn test_sync_packet_latency() {
    let sync = SyncPacket::new(1000, 5, 6, 1000 + 77175, true);
    let encoded = sync.encode();
    assert_eq!(encoded.len(), SyncPacket::SIZE);
    assert_eq!(encoded[1], 0xD4);

    let Ok(ControlPacket::Sync(decoded)) = ControlPacket::decode(encoded) else {
        panic!("Expected sync packet");
    };
    assert_eq!(decoded.latency(), 77175);
    assert_eq!(decoded.ntp_seconds, 5);
    assert_eq!(decoded.ntp_fraction, 6);
    assert!(decoded.extension());
}

#[test]
fn test_sync_latency_wraps() {
    let sync = SyncPacket::new(u32::MAX - 9, 0, 0, 10, false);
    assert_eq!(sync.latency(), 20);
}

#[test]
fn test_resend_request_wire_format() {
    let request = ResendRequest::new(0x1234, 3);
    let encoded = request.encode();

    assert_eq!(encoded, [0x80, 0xD5, 0x00, 0x01, 0x12, 0x34, 0x00, 0x03]);
    assert_eq!(ResendRequest::decode(&encoded).unwrap(), request);
}

#[test]
fn test_resend_response_wraps_audio() {
    let audio = AudioPacket::new(9, 3168, 42, vec![0xAB; 16]);
    let response = ResendResponse::new(audio.clone());
    let encoded = response.encode();
    assert_eq!(encoded[1] & 0x7F, RaopPayloadType::ResendResponse as u8);

    let Ok(ControlPacket::ResendResponse(decoded)) = ControlPacket::decode(encoded) else {
        panic!("Expected resend response");
    };
    assert_eq!(decoded.into_audio(), audio);
}

#[test]
fn test_control_rejects_unexpected_type() {
    let data = Bytes::from_static(&[0x80, 0xE0, 0x00, 0x01, 0, 0, 0, 0, 0, 0, 0, 0]);
    assert_eq!(
        ControlPacket::decode(data),
        Err(RtpDecodeError::UnexpectedPayloadType(0x60))
    );
}

#[test]
fn test_payload_type_from_u7() {
    assert_eq!(RaopPayloadType::from_u7(0xD4), Some(RaopPayloadType::Sync));
    assert_eq!(RaopPayloadType::from_u7(0x60), Some(RaopPayloadType::Audio));
    assert_eq!(RaopPayloadType::from_u7(0x52), None);
}
