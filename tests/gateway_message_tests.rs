use base64::Engine;
use voice_archiver::gateway::nats::decode_event;
use voice_archiver::gateway::GatewayEvent;
use voice_archiver::nats::messages::{
    GatewayEventMessage, JoinReply, SegmentAck, SegmentKind, SegmentMessage,
};

fn decode(json: &str) -> GatewayEvent {
    let message: GatewayEventMessage = serde_json::from_str(json).unwrap();
    decode_event(message).unwrap()
}

#[test]
fn test_packet_event_decoding() {
    let pcm = base64::engine::general_purpose::STANDARD.encode([1u8, 0, 2, 0]);
    let json = format!(
        r#"{{"type":"packet","speaker_id":"1234","pcm":"{}","timestamp":960,"sequence":7}}"#,
        pcm
    );

    match decode(&json) {
        GatewayEvent::Packet(packet) => {
            assert_eq!(packet.speaker_id.as_deref(), Some("1234"));
            assert_eq!(packet.pcm, vec![1, 0, 2, 0]);
            assert_eq!(packet.timestamp, Some(960));
            assert_eq!(packet.sequence, Some(7));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_unattributed_packet_decoding() {
    match decode(r#"{"type":"packet","pcm":""}"#) {
        GatewayEvent::Packet(packet) => {
            assert!(packet.speaker_id.is_none());
            assert!(packet.pcm.is_empty());
            assert!(packet.timestamp.is_none());
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_lifecycle_event_decoding() {
    assert!(matches!(decode(r#"{"type":"ready"}"#), GatewayEvent::Ready));
    assert!(matches!(
        decode(r#"{"type":"disconnect"}"#),
        GatewayEvent::Disconnect(None)
    ));
    assert!(matches!(
        decode(r#"{"type":"warn","message":"slow"}"#),
        GatewayEvent::Warn(m) if m == "slow"
    ));
    assert!(matches!(
        decode(r#"{"type":"user_disconnect","speaker_id":"9"}"#),
        GatewayEvent::UserDisconnect(id) if id == "9"
    ));

    match decode(r#"{"type":"channel_switch","speaker_id":"9","channel_id":"77"}"#) {
        GatewayEvent::ChannelSwitch {
            speaker_id,
            channel_id,
        } => {
            assert_eq!(speaker_id, "9");
            assert_eq!(channel_id, "77");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_invalid_pcm_is_rejected() {
    let message: GatewayEventMessage =
        serde_json::from_str(r#"{"type":"packet","pcm":"not base64!"}"#).unwrap();
    assert!(decode_event(message).is_err());
}

#[test]
fn test_join_reply_defaults() {
    let reply: JoinReply = serde_json::from_str(r#"{"ok":true}"#).unwrap();
    assert!(reply.ok);
    assert!(reply.error.is_none());
}

#[test]
fn test_segment_message_serialization() {
    let msg = SegmentMessage {
        destination_id: "archive".to_string(),
        kind: SegmentKind::Speaker,
        speaker_id: Some("42".to_string()),
        path: "/tmp/general/42-2024.mp3".to_string(),
        file_name: "42-2024.mp3".to_string(),
        caption: "Speaker 42".to_string(),
    };

    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains("\"kind\":\"speaker\""));
    assert!(json.contains("\"speaker_id\":\"42\""));

    let ack: SegmentAck = serde_json::from_str(r#"{"ok":false,"error":"disk full"}"#).unwrap();
    assert!(!ack.ok);
    assert_eq!(ack.error.as_deref(), Some("disk full"));
}
