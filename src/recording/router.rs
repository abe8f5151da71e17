use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::audio::{MixBus, MixBusConfig, MixFrame};

/// Lifecycle changes the scheduler must react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    NewSpeaker(String),
    /// The speaker is gone; `tail` is private audio still buffered when they
    /// left, to be written before their file closes
    SpeakerEnded {
        speaker_id: String,
        tail: Vec<MixFrame>,
    },
}

/// Live routing entry for one speaker
struct SpeakerState {
    /// Private bus holding only this speaker, when per-speaker capture is on
    private: Option<MixBus>,
    /// Packets seen since the last rotation
    packets_in_window: u64,
    packets_total: u64,
}

/// Routes speaker packets into the composite bus and private buses
///
/// The composite bus is owned by the caller; the router only attaches and
/// detaches its own sources on it, keyed by speaker id. The router is the
/// only place speaker entries are created or destroyed.
pub struct SpeakerRouter {
    channel_id: String,
    ignored: HashSet<String>,
    per_speaker: bool,
    private_config: MixBusConfig,
    speakers: HashMap<String, SpeakerState>,
}

impl SpeakerRouter {
    pub fn new(
        channel_id: &str,
        ignored: impl IntoIterator<Item = String>,
        per_speaker: bool,
        private_config: MixBusConfig,
    ) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            ignored: ignored.into_iter().collect(),
            per_speaker,
            private_config,
            speakers: HashMap::new(),
        }
    }

    /// Route one packet
    ///
    /// Returns `NewSpeaker` when the packet created a speaker entry.
    pub fn on_packet(
        &mut self,
        composite: &mut MixBus,
        speaker_id: Option<&str>,
        pcm: &[u8],
    ) -> Option<RouterEvent> {
        let speaker_id = speaker_id?;
        if self.ignored.contains(speaker_id) || composite.is_stopped() {
            return None;
        }

        let mut event = None;
        if !self.speakers.contains_key(speaker_id) {
            info!("New speaker {} in {}", speaker_id, self.channel_id);
            composite.add_source(speaker_id);
            let private = self.per_speaker.then(|| {
                let mut bus = MixBus::new(
                    format!("{}/{}", self.channel_id, speaker_id),
                    self.private_config.clone(),
                );
                bus.add_source(speaker_id);
                bus
            });
            self.speakers.insert(
                speaker_id.to_string(),
                SpeakerState {
                    private,
                    packets_in_window: 0,
                    packets_total: 0,
                },
            );
            event = Some(RouterEvent::NewSpeaker(speaker_id.to_string()));
        }

        let Some(state) = self.speakers.get_mut(speaker_id) else {
            return event;
        };
        state.packets_in_window += 1;
        state.packets_total += 1;

        // An ended source drains without its key, so re-attach if needed
        let source = match composite.source_mut(speaker_id) {
            Some(source) => source,
            None => composite.add_source(speaker_id),
        };
        source.write(pcm);

        if let Some(bus) = state.private.as_mut() {
            let source = match bus.source_mut(speaker_id) {
                Some(source) => source,
                None => bus.add_source(speaker_id),
            };
            source.write(pcm);
        }

        event
    }

    /// Tear down a speaker who left the guild voice state
    ///
    /// Their composite source is ended but stays on the bus until its buffered
    /// audio has been mixed. The private bus is drained into the event's tail.
    pub fn on_speaker_left(
        &mut self,
        composite: &mut MixBus,
        speaker_id: &str,
    ) -> Option<RouterEvent> {
        let state = self.speakers.remove(speaker_id)?;

        composite.end_source(speaker_id);
        let tail = match state.private {
            Some(mut bus) => drain_private(&mut bus, speaker_id),
            None => Vec::new(),
        };

        info!(
            "Speaker {} left {} after {} packets ({} buffered frames flushed)",
            speaker_id,
            self.channel_id,
            state.packets_total,
            tail.len()
        );
        Some(RouterEvent::SpeakerEnded {
            speaker_id: speaker_id.to_string(),
            tail,
        })
    }

    /// A speaker moved to `channel_id`; only moving away tears them down
    pub fn on_channel_switch(
        &mut self,
        composite: &mut MixBus,
        speaker_id: &str,
        channel_id: &str,
    ) -> Option<RouterEvent> {
        if channel_id == self.channel_id {
            return None;
        }
        debug!(
            "Speaker {} switched from {} to {}",
            speaker_id, self.channel_id, channel_id
        );
        self.on_speaker_left(composite, speaker_id)
    }

    /// Pull one frame from every private bus
    pub fn read_private_frames(&mut self) -> Vec<(String, MixFrame)> {
        self.speakers
            .iter_mut()
            .filter_map(|(id, state)| {
                let frame = state.private.as_mut()?.read_frame()?;
                Some((id.clone(), frame))
            })
            .collect()
    }

    /// Speakers whose private buffer still holds audio
    pub fn speakers_with_pending_audio(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .speakers
            .iter()
            .filter(|(id, state)| {
                state
                    .private
                    .as_ref()
                    .and_then(|bus| bus.source(id))
                    .is_some_and(|source| !source.is_empty())
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Close the routing window at a segment rotation
    ///
    /// Speakers that sent nothing during the window are torn down; they come
    /// back as new speakers on their next packet.
    pub fn end_window(&mut self, composite: &mut MixBus) -> Vec<RouterEvent> {
        let mut idle: Vec<String> = self
            .speakers
            .iter()
            .filter(|(_, state)| state.packets_in_window == 0)
            .map(|(id, _)| id.clone())
            .collect();
        idle.sort();

        let events = idle
            .iter()
            .filter_map(|id| self.on_speaker_left(composite, id))
            .collect();

        for state in self.speakers.values_mut() {
            state.packets_in_window = 0;
        }
        events
    }

    /// Drop every speaker
    pub fn clear(&mut self, composite: &mut MixBus) -> Vec<RouterEvent> {
        let mut ids: Vec<String> = self.speakers.keys().cloned().collect();
        ids.sort();
        ids.iter()
            .filter_map(|id| self.on_speaker_left(composite, id))
            .collect()
    }

    pub fn speaker_count(&self) -> usize {
        self.speakers.len()
    }

    pub fn contains(&self, speaker_id: &str) -> bool {
        self.speakers.contains_key(speaker_id)
    }

    /// Bytes discarded by private buffers
    pub fn dropped_bytes(&self) -> u64 {
        self.speakers
            .values()
            .filter_map(|state| state.private.as_ref())
            .map(|bus| bus.dropped_bytes())
            .sum()
    }
}

fn drain_private(bus: &mut MixBus, speaker_id: &str) -> Vec<MixFrame> {
    bus.end_source(speaker_id);
    let mut tail = Vec::new();
    while bus.has_pending_audio() {
        match bus.read_frame() {
            Some(frame) => tail.push(frame),
            None => break,
        }
    }
    bus.stop();
    tail
}
