use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::audio::EncoderKind;
use crate::session::Destination;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "voice-archiver".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    /// Subjects shared with the chat gateway sidecar
    pub gateway_prefix: String,
    /// Subjects segments are handed off on for `nats` destinations
    pub segment_prefix: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            gateway_prefix: "voice.gateway".to_string(),
            segment_prefix: "voice.segments".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token; `telegram` destinations are unavailable without one
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_telegram_api")]
    pub base_api_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_api_url: default_telegram_api(),
        }
    }
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Root for `directory` destinations
    pub root: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("archive"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Parent of the per-channel working directories
    pub work_dir: PathBuf,
    pub encoder: EncoderKind,
    pub ffmpeg_path: String,
    pub bitrate: String,
    pub buffer_capacity_bytes: usize,
    pub buffer_max_age_secs: u64,
    pub reconnect_delay_secs: u64,
    pub frame_duration_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("voice-archiver"),
            encoder: EncoderKind::Mp3,
            ffmpeg_path: "ffmpeg".to_string(),
            bitrate: "320k".to_string(),
            buffer_capacity_bytes: 64 * 1000 * 8,
            buffer_max_age_secs: 10,
            reconnect_delay_secs: 5,
            frame_duration_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    #[serde(default = "default_segment_interval")]
    pub segment_interval_secs: u64,
    #[serde(default)]
    pub ignored_speakers: Vec<String>,
    #[serde(default)]
    pub destinations: Vec<Destination>,
}

fn default_time_zone() -> String {
    "Asia/Taipei".to_string()
}

fn default_segment_interval() -> u64 {
    60
}

impl Config {
    /// Load `path` (any format the `config` crate knows, extension optional)
    /// with `VOICE_ARCHIVER__SECTION__KEY` environment overrides on top
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("VOICE_ARCHIVER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_applies_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archiver.toml");
        std::fs::write(
            &path,
            r#"
[recorder]
encoder = "wav"

[[channels]]
id = "123"

[[channels.destinations]]
type = "telegram"
id = "-100200"
send_per_speaker = true
"#,
        )
        .unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert!(!config.debug);
        assert_eq!(config.service.http.port, 3000);
        assert_eq!(config.recorder.encoder, EncoderKind::Wav);
        assert_eq!(config.recorder.reconnect_delay_secs, 5);

        let channel = &config.channels[0];
        assert_eq!(channel.time_zone, "Asia/Taipei");
        assert_eq!(channel.segment_interval_secs, 60);
        assert!(channel.ignored_speakers.is_empty());

        let destination = &channel.destinations[0];
        assert_eq!(destination.kind, "telegram");
        assert_eq!(destination.id, "-100200");
        assert!(destination.send_composite);
        assert!(destination.send_per_speaker);
    }

    #[test]
    fn test_partial_tables_keep_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archiver.toml");
        std::fs::write(
            &path,
            r#"
[service]
name = "archiver-eu"

[service.http]
port = 8080

[nats]
url = "nats://nats:4222"
"#,
        )
        .unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.service.name, "archiver-eu");
        assert_eq!(config.service.http.bind, "127.0.0.1");
        assert_eq!(config.service.http.port, 8080);
        assert_eq!(config.nats.url, "nats://nats:4222");
        assert_eq!(config.nats.gateway_prefix, "voice.gateway");
        assert_eq!(config.nats.segment_prefix, "voice.segments");
        assert_eq!(config.archive.root, PathBuf::from("archive"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(Config::load(path.to_str().unwrap()).is_err());
    }
}
