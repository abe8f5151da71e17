//! Delivery collaborators for finished segments
//!
//! A destination's `type` selects the delivery; its `id` is passed through
//! untouched (chat id, subject suffix or archive folder).
//!
//! - `telegram`: upload through the Bot API
//! - `nats`: hand the file path to a consumer and wait for its ack
//! - `directory`: copy into a local archive

pub mod directory;
pub mod nats;
pub mod telegram;

use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub use directory::DirectoryDelivery;
pub use nats::NatsDelivery;
pub use telegram::TelegramDelivery;

/// Sends one artifact to one destination
///
/// Implementations are shared by every session and must tolerate concurrent
/// calls. Retries and timeouts are their own business; an `Err` is logged by
/// the caller and otherwise ignored.
#[async_trait::async_trait]
pub trait Delivery: Send + Sync {
    /// Deliver the mixed recording of a segment
    async fn send_composite(&self, destination_id: &str, file: &Path, caption: &str)
        -> Result<()>;

    /// Deliver one speaker's isolated recording of a segment
    async fn send_per_speaker(
        &self,
        destination_id: &str,
        speaker_id: &str,
        file: &Path,
        caption: &str,
    ) -> Result<()>;

    /// Reject a destination id this delivery cannot serve
    fn check_destination(&self, _destination_id: &str) -> Result<()> {
        Ok(())
    }

    /// Get delivery name for logging
    fn name(&self) -> &str;
}

/// Deliveries available to destinations, keyed by destination type
#[derive(Clone, Default)]
pub struct DeliveryRegistry {
    deliveries: HashMap<String, Arc<dyn Delivery>>,
}

impl DeliveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: &str, delivery: Arc<dyn Delivery>) {
        self.deliveries.insert(kind.to_string(), delivery);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Delivery>> {
        self.deliveries.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.deliveries.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

/// File name used when uploading, falling back to the whole path
pub(crate) fn file_name(file: &Path) -> String {
    file.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string())
}
