// Bounded, self-expiring byte queue holding one speaker's inbound PCM
//
// Packets from the gateway arrive in bursts and stop entirely while a speaker
// is silent. The buffer absorbs both: it keeps at most `capacity_bytes`,
// discarding the oldest bytes first, and forgets anything that has waited
// longer than `max_age` without being mixed.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Limits for a speaker buffer
#[derive(Debug, Clone, Copy)]
pub struct BufferConfig {
    /// Maximum number of buffered bytes (default: 512000, ~2.7s of 48kHz stereo)
    pub capacity_bytes: usize,
    /// Bytes older than this are dropped before they are read (default: 10s)
    pub max_age: Duration,
    /// Drops happen in multiples of this so samples stay aligned
    pub block_align: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 64 * 1000 * 8,
            max_age: Duration::from_secs(10),
            block_align: 4,
        }
    }
}

impl BufferConfig {
    fn effective_capacity(&self) -> usize {
        let align = self.block_align.max(1);
        self.capacity_bytes - self.capacity_bytes % align
    }
}

struct Chunk {
    data: Vec<u8>,
    offset: usize,
    received_at: Instant,
}

impl Chunk {
    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

/// One speaker's inbound audio, consumed by a mix bus source slot
pub struct SpeakerBuffer {
    config: BufferConfig,
    chunks: VecDeque<Chunk>,
    len: usize,
    ended: bool,
    dropped_bytes: u64,
}

impl SpeakerBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            chunks: VecDeque::new(),
            len: 0,
            ended: false,
            dropped_bytes: 0,
        }
    }

    /// Append a frame, evicting the oldest bytes if the cap would be exceeded
    ///
    /// Writing after `end()` is a no-op.
    pub fn write(&mut self, frame: &[u8]) {
        if self.ended || frame.is_empty() {
            return;
        }

        let capacity = self.config.effective_capacity();
        if capacity == 0 {
            self.dropped_bytes += frame.len() as u64;
            return;
        }

        // A single frame larger than the whole buffer keeps only its tail
        let frame = if frame.len() > capacity {
            let skipped = frame.len() - capacity;
            self.dropped_bytes += skipped as u64;
            &frame[skipped..]
        } else {
            frame
        };

        self.chunks.push_back(Chunk {
            data: frame.to_vec(),
            offset: 0,
            received_at: Instant::now(),
        });
        self.len += frame.len();

        if self.len > capacity {
            let align = self.config.block_align.max(1);
            let excess = self.len - capacity;
            let excess = excess.div_ceil(align) * align;
            self.discard_front(excess);
            debug!(
                "Speaker buffer overflow: dropped {} oldest bytes ({} buffered)",
                excess, self.len
            );
        }
    }

    /// Take up to `max_bytes` of the oldest buffered audio
    ///
    /// Returns `None` when nothing (fresh enough) is buffered.
    pub fn read(&mut self, max_bytes: usize) -> Option<Vec<u8>> {
        self.expire();

        if self.len == 0 || max_bytes == 0 {
            return None;
        }

        let mut out = Vec::with_capacity(max_bytes.min(self.len));
        while out.len() < max_bytes {
            let Some(chunk) = self.chunks.front_mut() else {
                break;
            };
            let take = chunk.remaining().min(max_bytes - out.len());
            out.extend_from_slice(&chunk.data[chunk.offset..chunk.offset + take]);
            chunk.offset += take;
            if chunk.remaining() == 0 {
                self.chunks.pop_front();
            }
        }

        self.len -= out.len();
        Some(out)
    }

    /// Mark the stream complete; idempotent
    pub fn end(&mut self) {
        self.ended = true;
    }

    /// Ended and fully drained, so the owning slot can be released
    pub fn is_finished(&self) -> bool {
        self.ended && self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total bytes discarded by overflow or expiry
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    fn expire(&mut self) {
        let now = Instant::now();
        while let Some(chunk) = self.chunks.front() {
            if now.duration_since(chunk.received_at) <= self.config.max_age {
                break;
            }
            let stale = chunk.remaining();
            self.len -= stale;
            self.dropped_bytes += stale as u64;
            self.chunks.pop_front();
            debug!("Speaker buffer expired {} stale bytes", stale);
        }
    }

    fn discard_front(&mut self, mut bytes: usize) {
        while bytes > 0 {
            let Some(chunk) = self.chunks.front_mut() else {
                break;
            };
            let take = chunk.remaining().min(bytes);
            chunk.offset += take;
            bytes -= take;
            self.len -= take;
            self.dropped_bytes += take as u64;
            if chunk.remaining() == 0 {
                self.chunks.pop_front();
            }
        }
    }
}
