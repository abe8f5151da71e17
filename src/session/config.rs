use anyhow::{bail, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{BufferConfig, MixBusConfig, PcmFormat};
use crate::config::{ChannelConfig, RecorderConfig};
use crate::recording::is_path_component;

/// Where finished segments of a channel go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Delivery type, e.g. `telegram`, `nats`, `directory`
    #[serde(rename = "type")]
    pub kind: String,
    /// Passed to the delivery untouched
    pub id: String,
    #[serde(default = "default_true")]
    pub send_composite: bool,
    #[serde(default)]
    pub send_per_speaker: bool,
}

fn default_true() -> bool {
    true
}

/// Configuration for one channel's recording session
///
/// Immutable for the lifetime of the session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub channel_id: String,
    pub destinations: Vec<Destination>,
    /// Time zone captions are rendered in
    pub time_zone: Tz,
    /// Length of each segment
    /// Default: 60 seconds
    pub segment_interval: Duration,
    pub ignored_speakers: Vec<String>,
    /// Temporary segment files; owned exclusively by this session
    pub work_dir: PathBuf,
    /// Format, tick and buffer limits shared by every bus of the session
    pub mix: MixBusConfig,
    /// Fixed delay before reconnecting
    pub reconnect_delay: Duration,
}

impl SessionConfig {
    pub fn from_channel(channel: &ChannelConfig, recorder: &RecorderConfig) -> Result<Self> {
        if channel.id.trim().is_empty() {
            bail!("Channel id is required");
        }
        if !is_path_component(&channel.id) {
            bail!(
                "Channel id {:?} cannot name its own working directory",
                channel.id
            );
        }
        if channel.segment_interval_secs == 0 {
            bail!("Segment interval of channel {} must be positive", channel.id);
        }
        if recorder.frame_duration_ms == 0 {
            bail!("Frame duration must be positive");
        }

        let time_zone: Tz = match channel.time_zone.parse() {
            Ok(tz) => tz,
            Err(e) => bail!(
                "Unknown time zone {:?} for channel {}: {}",
                channel.time_zone,
                channel.id,
                e
            ),
        };

        let format = PcmFormat::default();
        Ok(Self {
            channel_id: channel.id.clone(),
            destinations: channel.destinations.clone(),
            time_zone,
            segment_interval: Duration::from_secs(channel.segment_interval_secs),
            ignored_speakers: channel.ignored_speakers.clone(),
            work_dir: recorder.work_dir.join(&channel.id),
            mix: MixBusConfig {
                format,
                frame_duration: Duration::from_millis(recorder.frame_duration_ms),
                buffer: BufferConfig {
                    capacity_bytes: recorder.buffer_capacity_bytes,
                    max_age: Duration::from_secs(recorder.buffer_max_age_secs),
                    block_align: format.block_align(),
                },
            },
            reconnect_delay: Duration::from_secs(recorder.reconnect_delay_secs),
        })
    }
}
