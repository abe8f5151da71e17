use anyhow::{bail, Result};
use std::path::Path;
use tracing::debug;

use super::{file_name, Delivery};
use crate::nats::{NatsClient, SegmentAck, SegmentKind, SegmentMessage};

/// Hands finished segments to a NATS consumer by path
///
/// The consumer must be done with the file before it acks; the dispatcher
/// deletes it right after.
pub struct NatsDelivery {
    client: NatsClient,
    subject_prefix: String,
}

impl NatsDelivery {
    pub fn new(client: NatsClient, subject_prefix: &str) -> Self {
        Self {
            client,
            subject_prefix: subject_prefix.to_string(),
        }
    }

    async fn send(&self, message: SegmentMessage) -> Result<()> {
        let subject = format!("{}.{}", self.subject_prefix, message.destination_id);
        let ack: SegmentAck = self.client.request_json(subject.clone(), &message).await?;

        if !ack.ok {
            bail!(
                "Consumer on {} rejected {}: {}",
                subject,
                message.file_name,
                ack.error.unwrap_or_else(|| "no reason given".to_string())
            );
        }

        debug!("Consumer on {} acknowledged {}", subject, message.file_name);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Delivery for NatsDelivery {
    async fn send_composite(
        &self,
        destination_id: &str,
        file: &Path,
        caption: &str,
    ) -> Result<()> {
        self.send(SegmentMessage {
            destination_id: destination_id.to_string(),
            kind: SegmentKind::Composite,
            speaker_id: None,
            path: file.display().to_string(),
            file_name: file_name(file),
            caption: caption.to_string(),
        })
        .await
    }

    async fn send_per_speaker(
        &self,
        destination_id: &str,
        speaker_id: &str,
        file: &Path,
        caption: &str,
    ) -> Result<()> {
        self.send(SegmentMessage {
            destination_id: destination_id.to_string(),
            kind: SegmentKind::Speaker,
            speaker_id: Some(speaker_id.to_string()),
            path: file.display().to_string(),
            file_name: file_name(file),
            caption: caption.to_string(),
        })
        .await
    }

    fn name(&self) -> &str {
        "nats"
    }
}
