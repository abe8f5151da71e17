// Voice gateway bridged over NATS
//
// A sidecar process owns the chat platform connection and relays it:
// - `{prefix}.join` (request/reply) asks it to join a channel
// - `{prefix}.leave` asks it to leave
// - `{prefix}.{channel}.events` carries packets and lifecycle events
// - `{prefix}.{channel}.play` receives outbound PCM frames

use anyhow::{bail, Context, Result};
use base64::Engine;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Connection, ConnectionControl, Gateway, GatewayEvent, PlaybackSource, VoicePacket};
use crate::nats::messages::{GatewayEventMessage, JoinReply, JoinRequest, LeaveRequest};
use crate::nats::NatsClient;

/// Inbound events buffered per connection before the bridge applies backpressure
const EVENT_QUEUE_SIZE: usize = 1024;

pub struct NatsGateway {
    client: NatsClient,
    prefix: String,
}

impl NatsGateway {
    pub fn new(client: NatsClient, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Gateway for NatsGateway {
    async fn join(&self, channel_id: &str) -> Result<Connection> {
        // Subscribe first so nothing sent right after the join reply is lost
        let events_subject = format!("{}.{}.events", self.prefix, channel_id);
        let mut subscriber = self.client.subscribe(events_subject).await?;

        let reply: JoinReply = self
            .client
            .request_json(
                format!("{}.join", self.prefix),
                &JoinRequest {
                    channel_id: channel_id.to_string(),
                },
            )
            .await
            .context("Join request failed")?;

        if !reply.ok {
            bail!(
                "Gateway refused to join {}: {}",
                channel_id,
                reply.error.unwrap_or_else(|| "no reason given".to_string())
            );
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let label = channel_id.to_string();

        let forward_task = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                let event = match serde_json::from_slice::<GatewayEventMessage>(&msg.payload) {
                    Ok(message) => match decode_event(message) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("Dropping undecodable event for {}: {:#}", label, e);
                            continue;
                        }
                    },
                    Err(e) => {
                        warn!("Failed to parse gateway event for {}: {}", label, e);
                        continue;
                    }
                };

                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("Gateway event stream for {} closed", label);
        });

        info!("Joined voice channel {} via NATS bridge", channel_id);

        Ok(Connection {
            channel_id: channel_id.to_string(),
            events: event_rx,
            control: Box::new(NatsConnectionControl {
                client: self.client.clone(),
                play_subject: format!("{}.{}.play", self.prefix, channel_id),
                forward_task,
                playback_task: None,
            }),
        })
    }

    async fn leave(&self, channel_id: &str) -> Result<()> {
        self.client
            .publish_json(
                format!("{}.leave", self.prefix),
                &LeaveRequest {
                    channel_id: channel_id.to_string(),
                },
            )
            .await
            .with_context(|| format!("Failed to leave {}", channel_id))
    }

    fn name(&self) -> &str {
        "nats-bridge"
    }
}

struct NatsConnectionControl {
    client: NatsClient,
    play_subject: String,
    forward_task: JoinHandle<()>,
    playback_task: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl ConnectionControl for NatsConnectionControl {
    async fn play(&mut self, mut source: Box<dyn PlaybackSource>) -> Result<()> {
        self.stop_playing().await;

        let client = self.client.clone();
        let subject = self.play_subject.clone();

        self.playback_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(source.frame_duration());
            loop {
                ticker.tick().await;
                let Some(frame) = source.next_frame() else {
                    break;
                };
                if let Err(e) = client.publish_bytes(subject.clone(), frame).await {
                    warn!("Outbound playback on {} stopped: {:#}", subject, e);
                    break;
                }
            }
        }));

        Ok(())
    }

    async fn stop_playing(&mut self) {
        if let Some(task) = self.playback_task.take() {
            task.abort();
        }
    }
}

impl Drop for NatsConnectionControl {
    fn drop(&mut self) {
        self.forward_task.abort();
        if let Some(task) = self.playback_task.take() {
            task.abort();
        }
    }
}

/// Convert a wire event into a gateway event, decoding packet PCM
pub fn decode_event(message: GatewayEventMessage) -> Result<GatewayEvent> {
    Ok(match message {
        GatewayEventMessage::Packet {
            speaker_id,
            pcm,
            timestamp,
            sequence,
        } => GatewayEvent::Packet(VoicePacket {
            speaker_id,
            pcm: base64::engine::general_purpose::STANDARD
                .decode(pcm)
                .context("Invalid base64 PCM")?,
            timestamp,
            sequence,
        }),
        GatewayEventMessage::Ready => GatewayEvent::Ready,
        GatewayEventMessage::Warn { message } => GatewayEvent::Warn(message),
        GatewayEventMessage::Error { message } => GatewayEvent::Error(message),
        GatewayEventMessage::Disconnect { reason } => GatewayEvent::Disconnect(reason),
        GatewayEventMessage::UserDisconnect { speaker_id } => {
            GatewayEvent::UserDisconnect(speaker_id)
        }
        GatewayEventMessage::ChannelSwitch {
            speaker_id,
            channel_id,
        } => GatewayEvent::ChannelSwitch {
            speaker_id,
            channel_id,
        },
    })
}
