use serde::{Deserialize, Serialize};

/// Event relayed by the gateway sidecar on `{prefix}.{channel}.events`
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEventMessage {
    Packet {
        #[serde(default)]
        speaker_id: Option<String>,
        pcm: String, // Base64-encoded PCM bytes
        #[serde(default)]
        timestamp: Option<u32>,
        #[serde(default)]
        sequence: Option<u16>,
    },
    Ready,
    Warn {
        message: String,
    },
    Error {
        message: String,
    },
    Disconnect {
        #[serde(default)]
        reason: Option<String>,
    },
    UserDisconnect {
        speaker_id: String,
    },
    ChannelSwitch {
        speaker_id: String,
        channel_id: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    pub channel_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinReply {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub channel_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Composite,
    Speaker,
}

/// Finished segment handed to a consumer on `{segment_prefix}.{destination}`
///
/// The file stays on disk until the consumer acknowledges.
#[derive(Debug, Serialize, Deserialize)]
pub struct SegmentMessage {
    pub destination_id: String,
    pub kind: SegmentKind,
    #[serde(default)]
    pub speaker_id: Option<String>,
    pub path: String,
    pub file_name: String,
    pub caption: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SegmentAck {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}
