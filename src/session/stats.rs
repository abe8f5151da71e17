use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a channel session, published after every notable change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub channel_id: String,

    /// Lifecycle state name (`connecting`, `active`, ...)
    pub state: String,

    /// When the current connection was established
    pub connected_since: Option<DateTime<Utc>>,

    /// Speakers currently routed
    pub speakers: usize,

    /// Segments handed to the dispatcher over the whole session
    pub segments_dispatched: u64,

    /// Completed backoff cycles
    pub reconnects: u64,

    /// Audio discarded by full or stale buffers on the current connection
    pub dropped_bytes: u64,

    /// End of the most recently closed segment
    pub last_segment_end: Option<DateTime<Utc>>,
}

impl SessionStats {
    pub fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            state: "connecting".to_string(),
            connected_since: None,
            speakers: 0,
            segments_dispatched: 0,
            reconnects: 0,
            dropped_bytes: 0,
            last_segment_end: None,
        }
    }
}
