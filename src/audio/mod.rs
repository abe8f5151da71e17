pub mod buffer;
pub mod encoder;
pub mod format;
pub mod mixer;

pub use buffer::{BufferConfig, SpeakerBuffer};
pub use encoder::{Encoder, EncoderFactory, EncoderKind, EncoderSink, RawEncoder, WavEncoder};
pub use format::PcmFormat;
pub use mixer::{MixBus, MixBusConfig, MixFrame};
