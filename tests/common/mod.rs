// Shared fakes for integration tests
#![allow(dead_code)]

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use voice_archiver::audio::{BufferConfig, MixBusConfig, PcmFormat};
use voice_archiver::gateway::{Connection, ConnectionControl, Gateway, GatewayEvent, PlaybackSource};
use voice_archiver::{Delivery, Destination, SessionConfig, VoicePacket};

/// 1kHz stereo with 20ms frames: 80 bytes per frame
pub fn small_mix() -> MixBusConfig {
    MixBusConfig {
        format: PcmFormat {
            sample_rate: 1000,
            channels: 2,
        },
        frame_duration: Duration::from_millis(20),
        buffer: BufferConfig {
            capacity_bytes: 8000,
            max_age: Duration::from_secs(10),
            block_align: 4,
        },
    }
}

pub const FRAME_BYTES: usize = 80;

pub fn session_config(work_dir: &Path, destinations: Vec<Destination>) -> SessionConfig {
    SessionConfig {
        channel_id: "general".to_string(),
        destinations,
        time_zone: chrono_tz::UTC,
        segment_interval: Duration::from_secs(60),
        ignored_speakers: vec!["bot".to_string()],
        work_dir: work_dir.join("general"),
        mix: small_mix(),
        reconnect_delay: Duration::from_secs(5),
    }
}

pub fn destination(kind: &str, id: &str, send_composite: bool, send_per_speaker: bool) -> Destination {
    Destination {
        kind: kind.to_string(),
        id: id.to_string(),
        send_composite,
        send_per_speaker,
    }
}

/// One frame of constant, non-zero audio attributed to `speaker`
pub fn packet(speaker: &str, level: u8) -> VoicePacket {
    VoicePacket {
        speaker_id: Some(speaker.to_string()),
        pcm: vec![level; FRAME_BYTES],
        timestamp: None,
        sequence: None,
    }
}

// ============================================================================
// Gateway
// ============================================================================

#[derive(Default)]
struct GatewayLog {
    joins: Vec<Instant>,
    leaves: Vec<Instant>,
    sender: Option<mpsc::Sender<GatewayEvent>>,
    failing_joins: usize,
    playing: usize,
    plays: usize,
}

/// Scripted gateway recording when joins and leaves happen
pub struct FakeGateway {
    log: Mutex<GatewayLog>,
    join_count: watch::Sender<usize>,
    leave_count: watch::Sender<usize>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(GatewayLog::default()),
            join_count: watch::channel(0).0,
            leave_count: watch::channel(0).0,
        })
    }

    /// Reject the next `n` join attempts
    pub fn fail_next_joins(&self, n: usize) {
        self.log.lock().unwrap().failing_joins = n;
    }

    pub fn joins(&self) -> Vec<Instant> {
        self.log.lock().unwrap().joins.clone()
    }

    pub fn leaves(&self) -> Vec<Instant> {
        self.log.lock().unwrap().leaves.clone()
    }

    /// Connections currently playing keep-alive audio
    pub fn playing(&self) -> usize {
        self.log.lock().unwrap().playing
    }

    /// Keep-alive playbacks started over the gateway's lifetime
    pub fn plays(&self) -> usize {
        self.log.lock().unwrap().plays
    }

    /// Drop the current connection's event stream, as a dead socket would
    pub fn close_stream(&self) {
        self.log.lock().unwrap().sender = None;
    }

    pub async fn wait_for_joins(&self, n: usize) {
        let mut rx = self.join_count.subscribe();
        rx.wait_for(|count| *count >= n).await.unwrap();
    }

    pub async fn wait_for_leaves(&self, n: usize) {
        let mut rx = self.leave_count.subscribe();
        rx.wait_for(|count| *count >= n).await.unwrap();
    }

    /// Deliver an event on the most recent connection
    pub async fn push(&self, event: GatewayEvent) {
        let sender = self.log.lock().unwrap().sender.clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }
}

struct FakeControl {
    gateway: Arc<FakeGateway>,
    playing: bool,
}

#[async_trait::async_trait]
impl ConnectionControl for FakeControl {
    async fn play(&mut self, mut source: Box<dyn PlaybackSource>) -> Result<()> {
        // The keep-alive source must produce silence
        if let Some(frame) = source.next_frame() {
            assert!(frame.iter().all(|b| *b == 0));
        }
        let mut log = self.gateway.log.lock().unwrap();
        log.plays += 1;
        if !self.playing {
            self.playing = true;
            log.playing += 1;
        }
        Ok(())
    }

    async fn stop_playing(&mut self) {
        if self.playing {
            self.playing = false;
            self.gateway.log.lock().unwrap().playing -= 1;
        }
    }
}

/// Wrapper so the gateway can hand out clones of itself to connections
pub struct SharedGateway(pub Arc<FakeGateway>);

#[async_trait::async_trait]
impl Gateway for SharedGateway {
    async fn join(&self, channel_id: &str) -> Result<Connection> {
        let (tx, rx) = mpsc::channel(1024);
        {
            let mut log = self.0.log.lock().unwrap();
            if log.failing_joins > 0 {
                log.failing_joins -= 1;
                log.joins.push(Instant::now());
                drop(log);
                self.0.join_count.send_modify(|count| *count += 1);
                bail!("channel {} unavailable", channel_id);
            }
            log.joins.push(Instant::now());
            log.sender = Some(tx);
        }
        self.0.join_count.send_modify(|count| *count += 1);

        Ok(Connection {
            channel_id: channel_id.to_string(),
            events: rx,
            control: Box::new(FakeControl {
                gateway: Arc::clone(&self.0),
                playing: false,
            }),
        })
    }

    async fn leave(&self, _channel_id: &str) -> Result<()> {
        {
            let mut log = self.0.log.lock().unwrap();
            log.leaves.push(Instant::now());
            log.sender = None;
        }
        self.0.leave_count.send_modify(|count| *count += 1);
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

// ============================================================================
// Delivery
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Composite,
    Speaker(String),
}

#[derive(Debug, Clone)]
pub struct DeliveryCall {
    pub destination_id: String,
    pub artifact: Artifact,
    pub file: PathBuf,
    pub caption: String,
    /// Whether the file was on disk when the delivery ran
    pub existed: bool,
}

/// Delivery that records every call and optionally rejects them all
pub struct RecordingDelivery {
    fail: bool,
    calls: Mutex<Vec<DeliveryCall>>,
}

impl RecordingDelivery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<DeliveryCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn composite_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.artifact == Artifact::Composite)
            .count()
    }

    pub fn speaker_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c.artifact, Artifact::Speaker(_)))
            .count()
    }

    fn record(&self, destination_id: &str, artifact: Artifact, file: &Path, caption: &str) -> Result<()> {
        self.calls.lock().unwrap().push(DeliveryCall {
            destination_id: destination_id.to_string(),
            artifact,
            file: file.to_path_buf(),
            caption: caption.to_string(),
            existed: file.exists(),
        });
        if self.fail {
            bail!("rejected by {}", destination_id);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Delivery for RecordingDelivery {
    async fn send_composite(&self, destination_id: &str, file: &Path, caption: &str) -> Result<()> {
        self.record(destination_id, Artifact::Composite, file, caption)
    }

    async fn send_per_speaker(
        &self,
        destination_id: &str,
        speaker_id: &str,
        file: &Path,
        caption: &str,
    ) -> Result<()> {
        self.record(
            destination_id,
            Artifact::Speaker(speaker_id.to_string()),
            file,
            caption,
        )
    }

    fn name(&self) -> &str {
        "recording"
    }
}
