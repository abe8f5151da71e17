use anyhow::{bail, Context, Result};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use super::{file_name, Delivery};

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Uploads segments with the Telegram Bot API `sendAudio` method
pub struct TelegramDelivery {
    http: reqwest::Client,
    endpoint: String,
}

impl TelegramDelivery {
    /// Fails when no bot token is configured
    pub fn new(token: &str, base_api_url: &str) -> Result<Self> {
        if token.trim().is_empty() {
            bail!("Telegram bot api token not found");
        }

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: format!(
                "{}/bot{}/sendAudio",
                base_api_url.trim_end_matches('/'),
                token.trim()
            ),
        })
    }

    async fn send_audio(&self, chat_id: &str, file: &Path, caption: &str) -> Result<()> {
        let bytes = tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {:?}", file))?;
        let name = file_name(file);
        let size = bytes.len();

        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("audio", Part::bytes(bytes).file_name(name.clone()));

        let response: ApiResponse = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .context("sendAudio request failed")?
            .json()
            .await
            .context("Malformed sendAudio response")?;

        if !response.ok {
            bail!(
                "Telegram rejected {}: {}",
                name,
                response.description.unwrap_or_default()
            );
        }

        debug!("Uploaded {} ({} bytes) to chat {}", name, size, chat_id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Delivery for TelegramDelivery {
    async fn send_composite(
        &self,
        destination_id: &str,
        file: &Path,
        caption: &str,
    ) -> Result<()> {
        self.send_audio(destination_id, file, caption).await
    }

    async fn send_per_speaker(
        &self,
        destination_id: &str,
        _speaker_id: &str,
        file: &Path,
        caption: &str,
    ) -> Result<()> {
        // The speaker is already named in the caption
        self.send_audio(destination_id, file, caption).await
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_token_is_rejected() {
        assert!(TelegramDelivery::new("", "https://api.telegram.org").is_err());
        assert!(TelegramDelivery::new("   ", "https://api.telegram.org").is_err());
    }

    #[test]
    fn test_endpoint_built_from_base_url() {
        let delivery = TelegramDelivery::new("123:abc", "http://localhost:8081/").unwrap();
        assert_eq!(delivery.endpoint, "http://localhost:8081/bot123:abc/sendAudio");
    }
}
