use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

use super::router::{RouterEvent, SpeakerRouter};
use super::scheduler::{SchedulerState, SegmentScheduler};
use super::segment::{Segment, SegmentClock};
use crate::audio::{Encoder, MixBus};
use crate::gateway::VoicePacket;
use crate::session::SessionConfig;

/// Recording pipeline of one live connection
///
/// Owns the composite bus, the speaker router and the segment scheduler. All
/// methods are driven from the session task; nothing here is shared.
pub struct ChannelRecorder {
    channel_id: String,
    composite: MixBus,
    router: SpeakerRouter,
    scheduler: SegmentScheduler,
    finished: bool,
}

impl ChannelRecorder {
    /// Build the pipeline and open the first segment
    pub async fn start(
        config: &SessionConfig,
        encoder: Arc<dyn Encoder>,
        per_speaker: bool,
        clock: SegmentClock,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.work_dir)
            .await
            .with_context(|| format!("Failed to create working directory {:?}", config.work_dir))?;

        let composite = MixBus::new(config.channel_id.clone(), config.mix.clone());
        let router = SpeakerRouter::new(
            &config.channel_id,
            config.ignored_speakers.iter().cloned(),
            per_speaker,
            config.mix.clone(),
        );
        let mut scheduler = SegmentScheduler::new(
            &config.channel_id,
            &config.work_dir,
            config.time_zone,
            encoder,
            per_speaker,
            clock,
        );
        scheduler.open(&[]).await;

        Ok(Self {
            channel_id: config.channel_id.clone(),
            composite,
            router,
            scheduler,
            finished: false,
        })
    }

    pub async fn on_packet(&mut self, packet: VoicePacket) {
        let event = self
            .router
            .on_packet(&mut self.composite, packet.speaker_id.as_deref(), &packet.pcm);
        self.apply(event.into_iter().collect()).await;
    }

    pub async fn on_speaker_left(&mut self, speaker_id: &str) {
        let event = self.router.on_speaker_left(&mut self.composite, speaker_id);
        self.apply(event.into_iter().collect()).await;
    }

    pub async fn on_channel_switch(&mut self, speaker_id: &str, channel_id: &str) {
        let event = self
            .router
            .on_channel_switch(&mut self.composite, speaker_id, channel_id);
        self.apply(event.into_iter().collect()).await;
    }

    /// Advance every bus by one frame and record the output
    pub async fn tick(&mut self) {
        if self.finished {
            return;
        }
        if let Some(frame) = self.composite.read_frame() {
            self.scheduler.write_composite(&frame).await;
        }
        for (speaker_id, frame) in self.router.read_private_frames() {
            self.scheduler.write_speaker(&speaker_id, &frame).await;
        }
    }

    /// Close the current segment and open the next one
    pub async fn rotate(&mut self) -> Option<Segment> {
        if self.finished {
            return None;
        }
        let pruned = self.router.end_window(&mut self.composite);
        if !pruned.is_empty() {
            debug!("Pruned {} idle speakers in {}", pruned.len(), self.channel_id);
        }
        self.apply(pruned).await;

        let carry = self.router.speakers_with_pending_audio();
        self.scheduler.rotate(&carry).await
    }

    /// Drop every speaker, mix out whatever is still buffered, then stop the
    /// composite and flush the final segment
    ///
    /// Later calls return `None`.
    pub async fn finish(&mut self) -> Option<Segment> {
        if self.finished {
            return None;
        }
        self.finished = true;

        let ended = self.router.clear(&mut self.composite);
        self.apply(ended).await;

        let mut flushed = 0;
        while self.composite.has_pending_audio() {
            let Some(frame) = self.composite.read_frame() else {
                break;
            };
            self.scheduler.write_composite(&frame).await;
            flushed += 1;
        }
        if flushed > 0 {
            debug!("Flushed {} buffered frames of {}", flushed, self.channel_id);
        }

        self.composite.stop();
        self.scheduler.finish().await
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn speaker_count(&self) -> usize {
        self.router.speaker_count()
    }

    pub fn has_speaker(&self, speaker_id: &str) -> bool {
        self.router.contains(speaker_id)
    }

    pub fn dropped_bytes(&self) -> u64 {
        self.composite.dropped_bytes() + self.router.dropped_bytes()
    }

    async fn apply(&mut self, events: Vec<RouterEvent>) {
        for event in events {
            match event {
                RouterEvent::NewSpeaker(id) => self.scheduler.on_new_speaker(&id).await,
                RouterEvent::SpeakerEnded { speaker_id, tail } => {
                    for frame in &tail {
                        self.scheduler.write_speaker(&speaker_id, frame).await;
                    }
                    self.scheduler.on_speaker_ended(&speaker_id).await;
                }
            }
        }
    }
}
