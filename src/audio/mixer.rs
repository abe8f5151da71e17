// Mix bus combining any number of speaker buffers into one PCM stream
//
// The bus is pulled once per output tick. Every attached source contributes
// the next frame-sized slice of its buffer; a source with nothing buffered
// contributes silence instead of stalling the bus, so the output keeps
// wall-clock pace no matter how irregular individual speakers are.
// Samples are summed in i32 and clipped back to the i16 range.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use super::buffer::{BufferConfig, SpeakerBuffer};
use super::format::{bytes_to_samples, samples_to_bytes, PcmFormat};
use crate::gateway::PlaybackSource;

/// Configuration for a mix bus
#[derive(Debug, Clone)]
pub struct MixBusConfig {
    /// Output sample format
    pub format: PcmFormat,
    /// Duration of one output frame (default: 20ms)
    pub frame_duration: Duration,
    /// Limits applied to every source buffer created by this bus
    pub buffer: BufferConfig,
}

impl Default for MixBusConfig {
    fn default() -> Self {
        Self {
            format: PcmFormat::default(),
            frame_duration: Duration::from_millis(20),
            buffer: BufferConfig::default(),
        }
    }
}

impl MixBusConfig {
    pub fn frame_bytes(&self) -> usize {
        self.format.frame_bytes(self.frame_duration)
    }
}

/// One output tick of a mix bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixFrame {
    /// Mixed PCM, always exactly one frame long
    pub pcm: Vec<u8>,
    /// Number of sources that had real audio this tick
    pub active_sources: usize,
}

impl MixFrame {
    pub fn is_silent(&self) -> bool {
        self.active_sources == 0
    }
}

/// Mixes dynamically attached sources into one continuous stream
pub struct MixBus {
    name: String,
    config: MixBusConfig,
    sources: HashMap<String, SpeakerBuffer>,
    /// Ended sources still holding audio, detached from their key
    draining: Vec<SpeakerBuffer>,
    stopped: bool,
}

impl MixBus {
    pub fn new(name: impl Into<String>, config: MixBusConfig) -> Self {
        let name = name.into();
        debug!(
            "Mix bus {} initialized: {}Hz, {} channels, {}ms frames",
            name,
            config.format.sample_rate,
            config.format.channels,
            config.frame_duration.as_millis()
        );

        Self {
            name,
            config,
            sources: HashMap::new(),
            draining: Vec::new(),
            stopped: false,
        }
    }

    /// Attach a fresh, empty source under `key`
    ///
    /// A source already registered under the same key is replaced and its
    /// buffered audio discarded.
    pub fn add_source(&mut self, key: &str) -> &mut SpeakerBuffer {
        let buffer = SpeakerBuffer::new(self.config.buffer);
        match self.sources.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                debug!("Mix bus {} replaced source {}", self.name, key);
                slot.insert(buffer);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(buffer),
        }
    }

    pub fn source_mut(&mut self, key: &str) -> Option<&mut SpeakerBuffer> {
        self.sources.get_mut(key)
    }

    pub fn source(&self, key: &str) -> Option<&SpeakerBuffer> {
        self.sources.get(key)
    }

    pub fn remove_source(&mut self, key: &str) -> Option<SpeakerBuffer> {
        self.sources.remove(key)
    }

    /// End the source under `key` and free the key
    ///
    /// Audio it still holds keeps being mixed until it drains; a source added
    /// later under the same key starts empty.
    pub fn end_source(&mut self, key: &str) -> bool {
        let Some(mut buffer) = self.sources.remove(key) else {
            return false;
        };
        buffer.end();
        if !buffer.is_finished() {
            self.draining.push(buffer);
        }
        true
    }

    /// Whether any source, live or ended, still holds audio
    pub fn has_pending_audio(&self) -> bool {
        self.sources
            .values()
            .chain(self.draining.iter())
            .any(|buffer| !buffer.is_empty())
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Bytes discarded by all attached sources
    pub fn dropped_bytes(&self) -> u64 {
        self.sources
            .values()
            .chain(self.draining.iter())
            .map(|s| s.dropped_bytes())
            .sum()
    }

    /// Produce the next output frame
    ///
    /// Returns `None` once the bus has been stopped.
    pub fn read_frame(&mut self) -> Option<MixFrame> {
        if self.stopped {
            return None;
        }

        let frame_bytes = self.config.frame_bytes();
        let mut sum = vec![0i32; frame_bytes / PcmFormat::BYTES_PER_SAMPLE];
        let mut active_sources = 0;

        for buffer in self.sources.values_mut().chain(self.draining.iter_mut()) {
            let Some(pcm) = buffer.read(frame_bytes) else {
                continue;
            };
            active_sources += 1;
            // Short reads are padded with silence
            for (acc, sample) in sum.iter_mut().zip(bytes_to_samples(&pcm)) {
                *acc += sample as i32;
            }
        }

        // Ended sources that have drained release their slot
        self.sources.retain(|_, buffer| !buffer.is_finished());
        self.draining.retain(|buffer| !buffer.is_finished());

        let mixed: Vec<i16> = sum
            .into_iter()
            .map(|s| s.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
            .collect();

        Some(MixFrame {
            pcm: samples_to_bytes(&mixed),
            active_sources,
        })
    }

    /// Detach every source and halt output; safe to call repeatedly
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        for buffer in self.sources.values_mut() {
            buffer.end();
        }
        let detached = self.sources.len() + self.draining.len();
        self.sources.clear();
        self.draining.clear();
        self.stopped = true;
        info!("Mix bus {} stopped ({} sources detached)", self.name, detached);
    }
}

impl PlaybackSource for MixBus {
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.read_frame().map(|frame| frame.pcm)
    }

    fn frame_duration(&self) -> Duration {
        self.config.frame_duration
    }
}
