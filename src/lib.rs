pub mod audio;
pub mod config;
pub mod delivery;
pub mod gateway;
pub mod http;
pub mod nats;
pub mod recording;
pub mod session;

pub use audio::{
    BufferConfig, Encoder, EncoderFactory, EncoderKind, EncoderSink, MixBus, MixBusConfig,
    MixFrame, PcmFormat, SpeakerBuffer,
};
pub use config::Config;
pub use delivery::{Delivery, DeliveryRegistry};
pub use gateway::{Connection, ConnectionControl, Gateway, GatewayEvent, PlaybackSource, VoicePacket};
pub use http::{create_router, AppState};
pub use nats::NatsClient;
pub use recording::{ChannelRecorder, DeliveryReport, Dispatcher, Segment, SegmentScheduler, SpeakerRouter};
pub use session::{
    Destination, SessionConfig, SessionDeps, SessionRegistry, SessionState, SessionStats,
    VoiceSession,
};
