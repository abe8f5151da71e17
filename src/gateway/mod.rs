//! Voice gateway abstraction
//!
//! The chat platform client is an external collaborator. The recorder only
//! needs to join and leave a channel, receive speaker-tagged PCM together with
//! connection lifecycle events, and keep an outbound stream playing.
//!
//! - `NatsGateway`: bridge to a sidecar process that owns the platform socket

pub mod nats;

use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;

pub use nats::NatsGateway;

/// One inbound audio packet
#[derive(Debug, Clone)]
pub struct VoicePacket {
    /// Speaker the packet is attributed to; keep-alive frames carry none
    pub speaker_id: Option<String>,
    /// Raw PCM (16-bit LE, interleaved)
    pub pcm: Vec<u8>,
    /// RTP timestamp, if the gateway exposes it
    pub timestamp: Option<u32>,
    /// RTP sequence number, if the gateway exposes it
    pub sequence: Option<u16>,
}

/// Everything a live connection reports, in arrival order
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Packet(VoicePacket),
    /// Connection (re)established by the gateway library
    Ready,
    Warn(String),
    Error(String),
    Disconnect(Option<String>),
    /// Speaker left the guild voice state entirely
    UserDisconnect(String),
    /// Speaker moved to `channel_id`
    ChannelSwitch {
        speaker_id: String,
        channel_id: String,
    },
}

/// Pull-based outbound audio
pub trait PlaybackSource: Send {
    /// Next frame to send; `None` ends playback
    fn next_frame(&mut self) -> Option<Vec<u8>>;

    /// How often `next_frame` should be pulled
    fn frame_duration(&self) -> Duration;
}

/// Control half of a joined voice connection
#[async_trait::async_trait]
pub trait ConnectionControl: Send {
    /// Start streaming `source` into the channel, replacing any current playback
    async fn play(&mut self, source: Box<dyn PlaybackSource>) -> Result<()>;

    /// Stop outbound playback; safe to call when nothing is playing
    async fn stop_playing(&mut self);
}

/// A joined voice channel
pub struct Connection {
    pub channel_id: String,
    /// Inbound packets and lifecycle events; closes when the connection dies
    pub events: mpsc::Receiver<GatewayEvent>,
    pub control: Box<dyn ConnectionControl>,
}

/// Voice gateway trait
#[async_trait::async_trait]
pub trait Gateway: Send + Sync {
    /// Join a voice channel
    async fn join(&self, channel_id: &str) -> Result<Connection>;

    /// Leave a voice channel; leaving a channel not joined is not an error
    async fn leave(&self, channel_id: &str) -> Result<()>;

    /// Get gateway name for logging
    fn name(&self) -> &str;
}
