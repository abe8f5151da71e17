use anyhow::{Context, Result};
use async_nats::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

/// Thin wrapper around the NATS connection shared by the gateway bridge and
/// the segment hand-off delivery
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(url: &str, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::ConnectOptions::new()
            .name(name)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client })
    }

    /// Publish a JSON-encoded message
    pub async fn publish_json<T: Serialize>(&self, subject: String, message: &T) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.publish_bytes(subject, payload).await
    }

    /// Publish a raw payload
    pub async fn publish_bytes(&self, subject: String, payload: Vec<u8>) -> Result<()> {
        let len = payload.len();
        self.client
            .publish(subject.clone(), payload.into())
            .await
            .with_context(|| format!("Failed to publish to {}", subject))?;

        debug!("Published {} bytes to {}", len, subject);

        Ok(())
    }

    /// Send a JSON request and decode the JSON reply
    pub async fn request_json<T, R>(&self, subject: String, message: &T) -> Result<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_vec(message)?;
        let reply = self
            .client
            .request(subject.clone(), payload.into())
            .await
            .with_context(|| format!("No reply on {}", subject))?;

        serde_json::from_slice(&reply.payload)
            .with_context(|| format!("Malformed reply on {}", subject))
    }

    pub async fn subscribe(&self, subject: String) -> Result<async_nats::Subscriber> {
        info!("Subscribing to {}", subject);

        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .with_context(|| format!("Failed to subscribe to {}", subject))?;

        Ok(subscriber)
    }
}
