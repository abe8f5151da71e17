//! Channel session management
//!
//! This module provides the `VoiceSession` that keeps one voice channel
//! recorded:
//! - Connect → record → disconnect → backoff → reconnect lifecycle
//! - Keep-alive playback while connected
//! - Final segment flush on every teardown
//! - Session statistics for the status API
//!
//! `SessionRegistry` runs one session per configured channel.

mod config;
mod registry;
mod session;
mod state;
mod stats;

pub use config::{Destination, SessionConfig};
pub use registry::{SessionDeps, SessionRegistry};
pub use session::VoiceSession;
pub use state::{SessionEvent, SessionState};
pub use stats::SessionStats;
