use super::config::SessionConfig;
use super::state::{SessionEvent, SessionState};
use super::stats::SessionStats;
use crate::audio::{Encoder, MixBus};
use crate::gateway::{Connection, ConnectionControl, Gateway, GatewayEvent};
use crate::recording::{ChannelRecorder, Dispatcher, Segment, SegmentClock};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often stats are refreshed while connected
const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Everything that lives exactly as long as one connection
struct ActiveChannel {
    attempt: Uuid,
    events: mpsc::Receiver<GatewayEvent>,
    control: Box<dyn ConnectionControl>,
    recorder: ChannelRecorder,
}

/// Keeps one voice channel recorded across reconnects
///
/// The session runs as a single task and owns its connection, recorder and
/// dispatcher outright. `state` is the only lifecycle field; it changes only
/// through `SessionState::on`.
pub struct VoiceSession {
    config: SessionConfig,
    gateway: Arc<dyn Gateway>,
    encoder: Arc<dyn Encoder>,
    dispatcher: Dispatcher,
    clock: SegmentClock,
    state: SessionState,
    active: Option<ActiveChannel>,
    stats: SessionStats,
    stats_tx: watch::Sender<SessionStats>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        gateway: Arc<dyn Gateway>,
        encoder: Arc<dyn Encoder>,
        dispatcher: Dispatcher,
    ) -> (Self, watch::Receiver<SessionStats>) {
        let stats = SessionStats::new(&config.channel_id);
        let (stats_tx, stats_rx) = watch::channel(stats.clone());

        let session = Self {
            config,
            gateway,
            encoder,
            dispatcher,
            clock: SegmentClock::start(),
            state: SessionState::Connecting,
            active: None,
            stats,
            stats_tx,
        };
        (session, stats_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until `cancel` fires, then flush and wait for
    /// outstanding deliveries
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Starting session for channel {} via {} gateway",
            self.config.channel_id,
            self.gateway.name()
        );
        prepare_work_dir(&self.config.work_dir).await;

        loop {
            let event = match self.state {
                SessionState::Connecting => {
                    tokio::select! {
                        event = self.connect() => event,
                        _ = cancel.cancelled() => {
                            // A join may have gone through before it was abandoned
                            self.leave().await;
                            SessionEvent::ShutdownRequested
                        }
                    }
                }
                SessionState::Active => self.run_active(&cancel).await,
                SessionState::Disconnecting { .. } => {
                    self.teardown().await;
                    SessionEvent::TeardownComplete
                }
                SessionState::Backoff => self.backoff(&cancel).await,
                SessionState::Stopped => break,
            };
            self.transition(event);
        }

        self.teardown().await;

        let pending = self.dispatcher.pending();
        if pending > 0 {
            info!(
                "Waiting for {} deliveries of channel {}",
                pending, self.config.channel_id
            );
        }
        let reports = self.dispatcher.drain().await;
        let failed: usize = reports.iter().map(|r| r.failed).sum();
        info!(
            "Session for channel {} stopped ({} segments dispatched, {} failed sends while draining)",
            self.config.channel_id,
            self.dispatcher.dispatched(),
            failed
        );
    }

    fn transition(&mut self, event: SessionEvent) {
        let previous = self.state;
        self.state = previous.on(event);

        if previous == SessionState::Backoff && self.state == SessionState::Connecting {
            self.stats.reconnects += 1;
        }
        if previous != self.state {
            debug!(
                "Channel {}: {} -> {} on {:?}",
                self.config.channel_id,
                previous.name(),
                self.state.name(),
                event
            );
        }
        self.publish_stats();
    }

    async fn connect(&mut self) -> SessionEvent {
        let attempt = Uuid::new_v4();
        let channel_id = self.config.channel_id.clone();
        info!("Joining channel {} (attempt {})", channel_id, attempt);

        let Connection {
            events,
            mut control,
            ..
        } = match self.gateway.join(&channel_id).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Failed to join channel {}: {:#}", channel_id, e);
                return SessionEvent::ConnectFailed;
            }
        };

        let recorder = match ChannelRecorder::start(
            &self.config,
            Arc::clone(&self.encoder),
            self.dispatcher.per_speaker_enabled(),
            self.clock,
        )
        .await
        {
            Ok(recorder) => recorder,
            Err(e) => {
                error!("Failed to start recording for {}: {:#}", channel_id, e);
                self.leave().await;
                return SessionEvent::ConnectFailed;
            }
        };

        // Silence keeps the connection alive and marks us present
        let keepalive = MixBus::new(format!("{}/keepalive", channel_id), self.config.mix.clone());
        if let Err(e) = control.play(Box::new(keepalive)).await {
            warn!("Failed to start keep-alive playback in {}: {:#}", channel_id, e);
        }

        self.active = Some(ActiveChannel {
            attempt,
            events,
            control,
            recorder,
        });
        self.stats.connected_since = Some(Utc::now());
        self.stats.dropped_bytes = 0;
        info!("Recording channel {}", channel_id);
        SessionEvent::Connected
    }

    async fn run_active(&mut self, cancel: &CancellationToken) -> SessionEvent {
        let Some(mut active) = self.active.take() else {
            return SessionEvent::ConnectionLost;
        };

        let period = self.config.segment_interval;
        let mut mix_tick = interval(self.config.mix.frame_duration);
        let mut rotation = interval_at(Instant::now() + period, period);
        let mut stats_tick = interval_at(Instant::now() + STATS_INTERVAL, STATS_INTERVAL);

        let event = loop {
            tokio::select! {
                _ = cancel.cancelled() => break SessionEvent::ShutdownRequested,
                event = active.events.recv() => {
                    let Some(event) = event else {
                        warn!("Event stream of {} closed", self.config.channel_id);
                        break SessionEvent::ConnectionLost;
                    };
                    if let Some(outcome) = self.on_gateway_event(&mut active, event).await {
                        break outcome;
                    }
                }
                _ = mix_tick.tick() => active.recorder.tick().await,
                _ = rotation.tick() => {
                    if let Some(segment) = active.recorder.rotate().await {
                        self.dispatch(segment);
                    }
                    self.refresh_stats(&active);
                }
                _ = stats_tick.tick() => self.refresh_stats(&active),
            }
        };

        self.active = Some(active);
        event
    }

    /// Forward one gateway event; returns the lifecycle event it triggers
    async fn on_gateway_event(
        &mut self,
        active: &mut ActiveChannel,
        event: GatewayEvent,
    ) -> Option<SessionEvent> {
        let channel_id = &self.config.channel_id;
        match event {
            GatewayEvent::Packet(packet) => active.recorder.on_packet(packet).await,
            GatewayEvent::UserDisconnect(speaker_id) => {
                active.recorder.on_speaker_left(&speaker_id).await
            }
            GatewayEvent::ChannelSwitch {
                speaker_id,
                channel_id: target,
            } => active.recorder.on_channel_switch(&speaker_id, &target).await,
            GatewayEvent::Warn(message) => warn!("Gateway warning in {}: {}", channel_id, message),
            GatewayEvent::Ready => {
                warn!(
                    "Gateway reconnected {} underneath us (attempt {}), leaving",
                    channel_id, active.attempt
                );
                return Some(SessionEvent::ForcedLeave);
            }
            GatewayEvent::Error(message) => {
                error!("Gateway error in {}: {}", channel_id, message);
                return Some(SessionEvent::ConnectionLost);
            }
            GatewayEvent::Disconnect(reason) => {
                info!(
                    "Disconnected from {}: {}",
                    channel_id,
                    reason.as_deref().unwrap_or("no reason given")
                );
                return Some(SessionEvent::ConnectionLost);
            }
        }
        None
    }

    /// Release the connection; safe to call in any state
    async fn teardown(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        info!(
            "Tearing down channel {} (attempt {})",
            self.config.channel_id, active.attempt
        );

        active.control.stop_playing().await;
        if let Some(segment) = active.recorder.finish().await {
            self.dispatch(segment);
        }
        self.stats.dropped_bytes = active.recorder.dropped_bytes();
        self.leave().await;

        // Speaker state, buses and the event stream go with it
        drop(active);
        self.stats.connected_since = None;
        self.stats.speakers = 0;
    }

    async fn leave(&mut self) {
        let channel_id = &self.config.channel_id;
        if let Err(e) = self.gateway.leave(channel_id).await {
            warn!("Failed to leave channel {}: {:#}", channel_id, e);
        }
    }

    async fn backoff(&mut self, cancel: &CancellationToken) -> SessionEvent {
        let delay = self.config.reconnect_delay;
        info!(
            "Reconnecting to {} in {}s",
            self.config.channel_id,
            delay.as_secs_f64()
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => SessionEvent::BackoffElapsed,
            _ = cancel.cancelled() => SessionEvent::ShutdownRequested,
        }
    }

    fn dispatch(&mut self, segment: Segment) {
        self.stats.last_segment_end = Some(segment.end);
        self.dispatcher.deliver(segment);
        self.stats.segments_dispatched = self.dispatcher.dispatched();
    }

    fn refresh_stats(&mut self, active: &ActiveChannel) {
        self.stats.speakers = active.recorder.speaker_count();
        self.stats.dropped_bytes = active.recorder.dropped_bytes();
        self.publish_stats();
    }

    fn publish_stats(&mut self) {
        self.stats.state = self.state.name().to_string();
        self.stats_tx.send_replace(self.stats.clone());
    }
}

/// Clear leftovers from an earlier run; files are never shared between
/// sessions, so anything here is stale
async fn prepare_work_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to clear working directory {:?}: {}", dir, e);
        }
    }
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!("Failed to create working directory {:?}: {}", dir, e);
    }
}
