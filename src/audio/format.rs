use std::time::Duration;

/// Sample format shared by every bus and encoder in a session
///
/// Always 16-bit signed little-endian PCM, interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48000, // Voice gateways deliver 48kHz
            channels: 2,        // Stereo
        }
    }
}

impl PcmFormat {
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Bytes for one sample across all channels
    pub fn block_align(&self) -> usize {
        Self::BYTES_PER_SAMPLE * self.channels as usize
    }

    /// Bytes of PCM covering `duration`, rounded down to whole blocks
    pub fn frame_bytes(&self, duration: Duration) -> usize {
        let blocks = self.sample_rate as u128 * duration.as_micros() / 1_000_000;
        blocks as usize * self.block_align()
    }

    /// Bytes of PCM produced per second
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.block_align()
    }
}

/// Decode little-endian PCM bytes into samples; a trailing odd byte is ignored
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bytes_for_20ms() {
        let format = PcmFormat::default();
        // 48000 * 0.02 = 960 blocks of 4 bytes
        assert_eq!(format.frame_bytes(Duration::from_millis(20)), 3840);
        assert_eq!(format.block_align(), 4);
        assert_eq!(format.bytes_per_second(), 192_000);
    }

    #[test]
    fn test_sample_conversion_keeps_sign() {
        let samples = vec![i16::MIN, -1, 0, 1, i16::MAX];
        let bytes = samples_to_bytes(&samples);
        assert_eq!(bytes.len(), 10);
        assert_eq!(bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn test_odd_trailing_byte_ignored() {
        assert_eq!(bytes_to_samples(&[1, 0, 7]), vec![1]);
    }
}
