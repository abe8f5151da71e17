// Segment rotation for one channel
//
// Exactly one segment is open at a time. Closing takes the open segment out
// of the scheduler before any file is finished, so nothing can write into a
// segment that is being closed. The next segment starts at the instant the
// previous one ended, which keeps windows contiguous and non-overlapping.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::segment::{composite_path, speaker_path, Segment, SegmentClock, SpeakerFile};
use crate::audio::{Encoder, EncoderSink, MixFrame};

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Open,
    Closing,
    Done,
}

/// One encoded output file of the open segment
struct SegmentWriter {
    path: PathBuf,
    sink: Option<Box<dyn EncoderSink>>,
    /// Frames with real audio written so far
    voiced_frames: u64,
    failed: bool,
}

impl SegmentWriter {
    async fn open(encoder: &dyn Encoder, path: PathBuf) -> Self {
        let (sink, failed) = match encoder.open(&path).await {
            Ok(sink) => (Some(sink), false),
            Err(e) => {
                warn!("Failed to open {} output {:?}: {:#}", encoder.name(), path, e);
                (None, true)
            }
        };

        Self {
            path,
            sink,
            voiced_frames: 0,
            failed,
        }
    }

    async fn write(&mut self, frame: &MixFrame) {
        if self.failed {
            return;
        }
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        if let Err(e) = sink.write(&frame.pcm).await {
            // Logged once; the rest of this file is dropped
            warn!("Write to {:?} failed, dropping further audio: {:#}", self.path, e);
            self.failed = true;
            return;
        }
        if !frame.is_silent() {
            self.voiced_frames += 1;
        }
    }

    /// Close the file, returning its path if it should be delivered
    async fn finish(self, keep_unvoiced: bool) -> Option<PathBuf> {
        let sink = self.sink?;
        match sink.finish().await {
            Ok(bytes) => debug!("Closed {:?} ({} bytes)", self.path, bytes),
            Err(e) => warn!("Failed to finalize {:?}: {:#}", self.path, e),
        }

        if keep_unvoiced || self.voiced_frames > 0 {
            Some(self.path)
        } else {
            remove_quietly(&self.path).await;
            None
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {:?}: {}", path, e);
        }
    }
}

struct OpenSegment {
    index: u64,
    start: DateTime<Utc>,
    composite: SegmentWriter,
    speakers: HashMap<String, SegmentWriter>,
    /// Speaker files closed early because the speaker left
    closed: Vec<SpeakerFile>,
}

/// Rotates a channel's recording into fixed windows
pub struct SegmentScheduler {
    channel_id: String,
    work_dir: PathBuf,
    time_zone: Tz,
    encoder: Arc<dyn Encoder>,
    per_speaker: bool,
    clock: SegmentClock,
    state: SchedulerState,
    next_index: u64,
    /// End of the last closed segment, start of the next one
    last_end: Option<DateTime<Utc>>,
    current: Option<OpenSegment>,
}

impl SegmentScheduler {
    pub fn new(
        channel_id: &str,
        work_dir: &Path,
        time_zone: Tz,
        encoder: Arc<dyn Encoder>,
        per_speaker: bool,
        clock: SegmentClock,
    ) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            work_dir: work_dir.to_path_buf(),
            time_zone,
            encoder,
            per_speaker,
            clock,
            state: SchedulerState::Idle,
            next_index: 0,
            last_end: None,
            current: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Speakers with an open file in the current segment
    pub fn open_speakers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .current
            .as_ref()
            .map(|segment| segment.speakers.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Open a new segment
    ///
    /// `carry` names speakers whose buffered audio will land in the new window;
    /// their files are opened up front.
    pub async fn open(&mut self, carry: &[String]) {
        if !matches!(self.state, SchedulerState::Idle | SchedulerState::Closing) {
            debug!(
                "Ignoring open for {} in state {:?}",
                self.channel_id, self.state
            );
            return;
        }

        let start = match self.last_end {
            Some(end) => end,
            None => self.clock.now(),
        };
        let index = self.next_index;
        self.next_index += 1;

        let path = composite_path(&self.work_dir, &start, self.encoder.extension());
        let composite = SegmentWriter::open(self.encoder.as_ref(), path).await;

        self.current = Some(OpenSegment {
            index,
            start,
            composite,
            speakers: HashMap::new(),
            closed: Vec::new(),
        });
        self.state = SchedulerState::Open;

        for speaker_id in carry {
            self.on_new_speaker(speaker_id).await;
        }

        info!(
            "Opened segment {} for {} at {}",
            index,
            self.channel_id,
            start.to_rfc3339()
        );
    }

    /// A speaker joined the in-progress segment
    pub async fn on_new_speaker(&mut self, speaker_id: &str) {
        if !self.per_speaker {
            return;
        }
        let Some(segment) = self.current.as_mut() else {
            return;
        };
        if segment.speakers.contains_key(speaker_id) {
            return;
        }

        let path = speaker_path(
            &self.work_dir,
            speaker_id,
            &segment.start,
            self.encoder.extension(),
        );
        let writer = SegmentWriter::open(self.encoder.as_ref(), path).await;
        segment.speakers.insert(speaker_id.to_string(), writer);
        debug!(
            "Speaker {} joined segment {} of {}",
            speaker_id, segment.index, self.channel_id
        );
    }

    /// Feed one composite frame into the open segment
    pub async fn write_composite(&mut self, frame: &MixFrame) {
        if let Some(segment) = self.current.as_mut() {
            segment.composite.write(frame).await;
        }
    }

    /// Feed one private frame of `speaker_id` into the open segment
    ///
    /// Silent frames never open a file on their own.
    pub async fn write_speaker(&mut self, speaker_id: &str, frame: &MixFrame) {
        if !self.per_speaker || self.current.is_none() {
            return;
        }

        let has_writer = self
            .current
            .as_ref()
            .is_some_and(|segment| segment.speakers.contains_key(speaker_id));
        if !has_writer {
            if frame.is_silent() {
                return;
            }
            self.on_new_speaker(speaker_id).await;
        }

        if let Some(writer) = self
            .current
            .as_mut()
            .and_then(|segment| segment.speakers.get_mut(speaker_id))
        {
            writer.write(frame).await;
        }
    }

    /// Close `speaker_id`'s file; the composite keeps recording
    pub async fn on_speaker_ended(&mut self, speaker_id: &str) {
        let Some(segment) = self.current.as_mut() else {
            return;
        };
        let Some(writer) = segment.speakers.remove(speaker_id) else {
            return;
        };

        if let Some(path) = writer.finish(false).await {
            segment.closed.push(SpeakerFile {
                speaker_id: speaker_id.to_string(),
                path,
            });
        }
    }

    /// Close the open segment and immediately open the next one
    pub async fn rotate(&mut self, carry: &[String]) -> Option<Segment> {
        let closed = self.close().await;
        if self.state == SchedulerState::Closing {
            self.open(carry).await;
        }
        closed
    }

    /// Flush the final partial segment; later calls return `None`
    pub async fn finish(&mut self) -> Option<Segment> {
        if self.state == SchedulerState::Done {
            return None;
        }
        let closed = self.close().await;
        self.state = SchedulerState::Done;
        closed
    }

    async fn close(&mut self) -> Option<Segment> {
        if self.state != SchedulerState::Open {
            return None;
        }
        self.state = SchedulerState::Closing;

        // Detach before finishing anything
        let open = self.current.take()?;
        let end = self.clock.now();
        self.last_end = Some(end);

        let composite = open.composite.finish(true).await;

        let mut speakers = open.closed;
        for (speaker_id, writer) in open.speakers {
            if let Some(path) = writer.finish(false).await {
                speakers.push(SpeakerFile { speaker_id, path });
            }
        }
        speakers.sort_by(|a, b| a.speaker_id.cmp(&b.speaker_id).then(a.path.cmp(&b.path)));

        let segment = Segment {
            channel_id: self.channel_id.clone(),
            index: open.index,
            start: open.start,
            end,
            time_zone: self.time_zone,
            composite,
            speakers,
        };

        info!(
            "Closed segment {} for {}: {} -> {} ({} speaker files)",
            segment.index,
            self.channel_id,
            segment.start.to_rfc3339(),
            segment.end.to_rfc3339(),
            segment.speakers.len()
        );
        Some(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RawEncoder;
    use std::time::Duration;
    use tempfile::TempDir;

    fn scheduler(dir: &Path, per_speaker: bool) -> SegmentScheduler {
        SegmentScheduler::new(
            "general",
            dir,
            chrono_tz::UTC,
            Arc::new(RawEncoder),
            per_speaker,
            SegmentClock::start(),
        )
    }

    fn voiced() -> MixFrame {
        MixFrame {
            pcm: vec![1, 0, 1, 0],
            active_sources: 1,
        }
    }

    fn silent() -> MixFrame {
        MixFrame {
            pcm: vec![0; 4],
            active_sources: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_is_contiguous() {
        let dir = TempDir::new().unwrap();
        let mut scheduler = scheduler(dir.path(), false);
        scheduler.open(&[]).await;

        tokio::time::advance(Duration::from_secs(60)).await;
        let first = scheduler.rotate(&[]).await.unwrap();
        tokio::time::advance(Duration::from_secs(12)).await;
        let second = scheduler.finish().await.unwrap();

        assert_eq!(first.end, second.start);
        assert_eq!(first.duration(), chrono::Duration::seconds(60));
        assert_eq!(second.duration(), chrono::Duration::seconds(12));
        assert_eq!((first.index, second.index), (0, 1));
        assert_ne!(first.composite, second.composite);
        assert_eq!(scheduler.state(), SchedulerState::Done);
    }

    #[tokio::test]
    async fn test_finish_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut scheduler = scheduler(dir.path(), false);
        scheduler.open(&[]).await;

        assert!(scheduler.finish().await.is_some());
        assert!(scheduler.finish().await.is_none());
        assert!(scheduler.rotate(&[]).await.is_none());
        assert_eq!(scheduler.state(), SchedulerState::Done);
    }

    #[tokio::test]
    async fn test_silent_segment_still_produced() {
        let dir = TempDir::new().unwrap();
        let mut scheduler = scheduler(dir.path(), true);
        scheduler.open(&[]).await;
        scheduler.write_composite(&silent()).await;

        let segment = scheduler.finish().await.unwrap();
        let composite = segment.composite.unwrap();
        assert_eq!(std::fs::read(composite).unwrap(), vec![0; 4]);
        assert!(segment.speakers.is_empty());
    }

    #[tokio::test]
    async fn test_speaker_file_opens_on_first_voiced_frame() {
        let dir = TempDir::new().unwrap();
        let mut scheduler = scheduler(dir.path(), true);
        scheduler.open(&[]).await;

        scheduler.write_speaker("a", &silent()).await;
        assert!(scheduler.open_speakers().is_empty());

        scheduler.write_speaker("a", &voiced()).await;
        scheduler.write_speaker("a", &silent()).await;
        assert_eq!(scheduler.open_speakers(), vec!["a".to_string()]);

        let segment = scheduler.finish().await.unwrap();
        assert_eq!(segment.speakers.len(), 1);
        assert_eq!(std::fs::read(&segment.speakers[0].path).unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_unvoiced_speaker_file_is_discarded() {
        let dir = TempDir::new().unwrap();
        let mut scheduler = scheduler(dir.path(), true);
        scheduler.open(&["quiet".to_string()]).await;
        assert_eq!(scheduler.open_speakers(), vec!["quiet".to_string()]);

        let segment = scheduler.finish().await.unwrap();
        assert!(segment.speakers.is_empty());
        // Only the composite remains on disk
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_rejoin_within_segment_gets_second_file() {
        let dir = TempDir::new().unwrap();
        let mut scheduler = scheduler(dir.path(), true);
        scheduler.open(&[]).await;

        scheduler.write_speaker("a", &voiced()).await;
        scheduler.on_speaker_ended("a").await;
        scheduler.write_speaker("a", &voiced()).await;

        let segment = scheduler.finish().await.unwrap();
        assert_eq!(segment.speakers.len(), 2);
        assert_ne!(segment.speakers[0].path, segment.speakers[1].path);
        assert!(segment.speakers.iter().all(|f| f.speaker_id == "a"));
    }

    #[tokio::test]
    async fn test_per_speaker_disabled_never_opens_files() {
        let dir = TempDir::new().unwrap();
        let mut scheduler = scheduler(dir.path(), false);
        scheduler.open(&["a".to_string()]).await;
        scheduler.on_new_speaker("b").await;
        scheduler.write_speaker("c", &voiced()).await;

        assert!(scheduler.open_speakers().is_empty());
        assert!(scheduler.finish().await.unwrap().speakers.is_empty());
    }
}
