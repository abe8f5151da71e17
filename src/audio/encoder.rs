use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, warn};

use super::format::{bytes_to_samples, PcmFormat};

/// Container format segment files are written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// MP3 through an external ffmpeg process
    Mp3,
    /// WAV written in-process
    Wav,
    /// Raw PCM, no container
    Pcm,
}

/// Turns raw PCM into an encoded file
///
/// Implementations:
/// - `FfmpegEncoder`: external transcoder process (MP3)
/// - `WavEncoder`: in-process WAV via hound
/// - `RawEncoder`: pass-through, used for debugging and tests
#[async_trait::async_trait]
pub trait Encoder: Send + Sync {
    /// File extension without the dot
    fn extension(&self) -> &str;

    /// Get encoder name for logging
    fn name(&self) -> &str;

    /// Start a new encoded file at `path`
    async fn open(&self, path: &Path) -> Result<Box<dyn EncoderSink>>;
}

/// Input side of one open encoded file
#[async_trait::async_trait]
pub trait EncoderSink: Send {
    /// Feed interleaved 16-bit little-endian PCM
    async fn write(&mut self, pcm: &[u8]) -> Result<()>;

    /// Flush and close the file, returning its size in bytes
    async fn finish(self: Box<Self>) -> Result<u64>;
}

/// Encoder factory
pub struct EncoderFactory;

impl EncoderFactory {
    pub fn create(
        kind: EncoderKind,
        format: PcmFormat,
        ffmpeg_path: &str,
        bitrate: &str,
        debug: bool,
    ) -> Arc<dyn Encoder> {
        match kind {
            EncoderKind::Mp3 => Arc::new(FfmpegEncoder {
                program: PathBuf::from(ffmpeg_path),
                format,
                bitrate: bitrate.to_string(),
                debug,
            }),
            EncoderKind::Wav => Arc::new(WavEncoder { format }),
            EncoderKind::Pcm => Arc::new(RawEncoder),
        }
    }
}

// ============================================================================
// Raw PCM
// ============================================================================

/// Writes PCM bytes unchanged
pub struct RawEncoder;

#[async_trait::async_trait]
impl Encoder for RawEncoder {
    fn extension(&self) -> &str {
        "pcm"
    }

    fn name(&self) -> &str {
        "raw"
    }

    async fn open(&self, path: &Path) -> Result<Box<dyn EncoderSink>> {
        let file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create PCM file: {:?}", path))?;

        Ok(Box::new(RawSink {
            writer: tokio::io::BufWriter::new(file),
            written: 0,
        }))
    }
}

struct RawSink {
    writer: tokio::io::BufWriter<tokio::fs::File>,
    written: u64,
}

#[async_trait::async_trait]
impl EncoderSink for RawSink {
    async fn write(&mut self, pcm: &[u8]) -> Result<()> {
        self.writer
            .write_all(pcm)
            .await
            .context("Failed to write PCM")?;
        self.written += pcm.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<u64> {
        self.writer.flush().await.context("Failed to flush PCM file")?;
        Ok(self.written)
    }
}

// ============================================================================
// WAV
// ============================================================================

/// Writes 16-bit WAV files in-process
pub struct WavEncoder {
    format: PcmFormat,
}

impl WavEncoder {
    pub fn new(format: PcmFormat) -> Self {
        Self { format }
    }
}

#[async_trait::async_trait]
impl Encoder for WavEncoder {
    fn extension(&self) -> &str {
        "wav"
    }

    fn name(&self) -> &str {
        "wav"
    }

    async fn open(&self, path: &Path) -> Result<Box<dyn EncoderSink>> {
        let spec = hound::WavSpec {
            channels: self.format.channels,
            sample_rate: self.format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", path))?;

        Ok(Box::new(WavSink {
            writer: Some(writer),
            path: path.to_path_buf(),
        }))
    }
}

struct WavSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    path: PathBuf,
}

#[async_trait::async_trait]
impl EncoderSink for WavSink {
    async fn write(&mut self, pcm: &[u8]) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            for sample in bytes_to_samples(pcm) {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to WAV")?;
            }
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<u64> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }
        let metadata = tokio::fs::metadata(&self.path).await?;
        Ok(metadata.len())
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}

// ============================================================================
// ffmpeg
// ============================================================================

/// MP3 encoding through an ffmpeg child process
///
/// PCM goes in on stdin, the encoded stream is written by ffmpeg straight
/// into the segment file through its stdout.
pub struct FfmpegEncoder {
    program: PathBuf,
    format: PcmFormat,
    bitrate: String,
    debug: bool,
}

impl FfmpegEncoder {
    fn args(&self) -> Vec<String> {
        let rate = self.format.sample_rate.to_string();
        let channels = self.format.channels.to_string();
        [
            "-hide_banner",
            "-f", "s16le",
            "-ac", channels.as_str(),
            "-ar", rate.as_str(),
            "-i", "-",
            "-c:a", "libmp3lame",
            "-ac", channels.as_str(),
            "-ar", rate.as_str(),
            "-ab", self.bitrate.as_str(),
            "-f", "mp3",
            "-",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

#[async_trait::async_trait]
impl Encoder for FfmpegEncoder {
    fn extension(&self) -> &str {
        "mp3"
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn open(&self, path: &Path) -> Result<Box<dyn EncoderSink>> {
        let output = File::create(path)
            .with_context(|| format!("Failed to create MP3 file: {:?}", path))?;

        let mut child = Command::new(&self.program)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::from(output))
            .stderr(if self.debug { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {:?}", self.program))?;

        if let Some(stderr) = child.stderr.take() {
            let label = path.display().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("ffmpeg [{}]: {}", label, line);
                }
            });
        }

        let Some(stdin) = child.stdin.take() else {
            bail!("ffmpeg stdin was not captured");
        };

        Ok(Box::new(FfmpegSink {
            child,
            stdin: Some(stdin),
            path: path.to_path_buf(),
        }))
    }
}

struct FfmpegSink {
    child: Child,
    stdin: Option<ChildStdin>,
    path: PathBuf,
}

#[async_trait::async_trait]
impl EncoderSink for FfmpegSink {
    async fn write(&mut self, pcm: &[u8]) -> Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            bail!("ffmpeg input already closed");
        };
        stdin
            .write_all(pcm)
            .await
            .context("Failed to write PCM to ffmpeg")?;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<u64> {
        // Closing stdin lets ffmpeg flush the trailing frames and exit
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .await
            .context("Failed to wait for ffmpeg")?;
        if !status.success() {
            bail!("ffmpeg exited with {} for {:?}", status, self.path);
        }
        let metadata = tokio::fs::metadata(&self.path).await?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_raw_encoder_passes_bytes_through() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.pcm");

        let mut sink = RawEncoder.open(&path).await.unwrap();
        sink.write(&[1, 2, 3, 4]).await.unwrap();
        sink.write(&[5, 6]).await.unwrap();
        assert_eq!(sink.finish().await.unwrap(), 6);

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_wav_encoder_writes_readable_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        let encoder = WavEncoder::new(PcmFormat::default());

        let mut sink = encoder.open(&path).await.unwrap();
        sink.write(&crate::audio::format::samples_to_bytes(&[10, -10, 20, -20]))
            .await
            .unwrap();
        assert!(sink.finish().await.unwrap() > 0);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 48000);
        assert_eq!(reader.spec().channels, 2);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![10, -10, 20, -20]);
    }

    #[test]
    fn test_ffmpeg_args_follow_format() {
        let encoder = FfmpegEncoder {
            program: PathBuf::from("ffmpeg"),
            format: PcmFormat::default(),
            bitrate: "320k".to_string(),
            debug: false,
        };
        let args = encoder.args().join(" ");
        assert!(args.contains("-f s16le -ac 2 -ar 48000 -i -"));
        assert!(args.contains("-c:a libmp3lame"));
        assert!(args.ends_with("-ab 320k -f mp3 -"));
    }

    #[test]
    fn test_factory_extensions() {
        let format = PcmFormat::default();
        let mp3 = EncoderFactory::create(EncoderKind::Mp3, format, "ffmpeg", "320k", false);
        let wav = EncoderFactory::create(EncoderKind::Wav, format, "ffmpeg", "320k", false);
        let pcm = EncoderFactory::create(EncoderKind::Pcm, format, "ffmpeg", "320k", false);
        assert_eq!(mp3.extension(), "mp3");
        assert_eq!(wav.extension(), "wav");
        assert_eq!(pcm.extension(), "pcm");
    }
}
