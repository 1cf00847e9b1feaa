//! Shared protocol definitions for the Paroli streaming TTS endpoint.
//!
//! The protocol is simple:
//! - Client sends: JSON text message with the text to synthesize
//! - Server returns: a JSON status message, then raw PCM audio as binary messages
//! - A zero-length binary message is a keepalive and never carries audio
//!
//! Failures are reported in-band as a status message and leave the
//! connection usable for the next request.

mod error;
mod frame;
mod request;
mod speakers;

use std::time::Duration;

pub use error::ProtocolError;
pub use frame::{InboundFrame, StatusFrame};
pub use request::{AudioEncoding, RequestBuilder, SynthesisRequest};
pub use speakers::SpeakerDirectory;

/// Websocket path of the streaming endpoint
pub const STREAM_PATH: &str = "api/v1/stream";

/// HTTP path of the speaker directory
pub const SPEAKERS_PATH: &str = "api/v1/speakers";

/// Audio format constants
pub const SAMPLE_RATE: u32 = 24000;
pub const CHANNELS: u16 = 1;
pub const BITS_PER_SAMPLE: u16 = 16;

/// Format of the PCM carried by binary frames.
///
/// Samples are always little-endian signed 16-bit; only the rate differs
/// between deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub fn pcm16_mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: CHANNELS,
            bits_per_sample: BITS_PER_SAMPLE,
        }
    }

    /// Bytes for one sample across all channels
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// Number of interleaved samples covering `duration`
    pub fn samples_for(&self, duration: Duration) -> usize {
        let frames = (duration.as_secs_f64() * self.sample_rate as f64).round() as usize;
        frames * self.channels as usize
    }

    /// Playback duration of `bytes` of PCM in this format
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let frames = bytes / self.bytes_per_frame().max(1);
        Duration::from_secs_f64(frames as f64 / self.sample_rate.max(1) as f64)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_mono(SAMPLE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format_is_mono_pcm16() {
        let format = AudioFormat::default();
        assert_eq!(format.sample_rate, 24000);
        assert_eq!(format.channels, 1);
        assert_eq!(format.bytes_per_frame(), 2);
    }

    #[test]
    fn test_flush_interval_sample_count() {
        let format = AudioFormat::pcm16_mono(22500);
        assert_eq!(format.samples_for(Duration::from_millis(100)), 2250);
    }

    #[test]
    fn test_duration_of_one_second() {
        let format = AudioFormat::pcm16_mono(24000);
        assert_eq!(format.duration_of(48000), Duration::from_secs(1));
    }
}
