//! Per-channel recording pipeline
//!
//! Packets flow through the `SpeakerRouter` into speaker buffers on the
//! composite bus (and private buses when isolated files are wanted). The
//! `SegmentScheduler` encodes bus output into fixed windows and the
//! `Dispatcher` delivers each closed window, then deletes its files.

pub mod dispatcher;
pub mod recorder;
pub mod router;
pub mod scheduler;
pub mod segment;

pub use dispatcher::{DeliveryReport, Dispatcher};
pub use recorder::ChannelRecorder;
pub use router::{RouterEvent, SpeakerRouter};
pub use scheduler::{SchedulerState, SegmentScheduler};
pub use segment::{Segment, SegmentClock, SpeakerFile};
pub(crate) use segment::is_path_component;
