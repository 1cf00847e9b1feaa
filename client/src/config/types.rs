//! Configuration Types

use std::time::Duration;

use paroli_protocol::{AudioEncoding, AudioFormat, RequestBuilder, SPEAKERS_PATH, STREAM_PATH};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub synthesis: SynthesisConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Where the synthesis server lives
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Base HTTP URL; the websocket URL is derived from it
    #[serde(default = "default_server_url")]
    pub url: String,

    /// Sent as `Authorization: Bearer <token>` on the stream handshake
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8848".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            auth_token: None,
        }
    }
}

impl ServerConfig {
    fn base(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// `http(s)://host/` becomes `ws(s)://host/api/v1/stream`
    pub fn stream_url(&self) -> String {
        let base = self.base();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/{}", ws_base, STREAM_PATH)
    }

    pub fn speakers_url(&self) -> String {
        format!("{}/{}", self.base(), SPEAKERS_PATH)
    }
}

/// Playback settings; must match what the deployment streams
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// 22500 or 24000 depending on the voice model
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// How often buffered PCM is handed to the output device
    #[serde(default = "default_flush_ms")]
    pub flush_ms: u64,

    /// `pcm`, or empty to leave `audio_format` out of requests
    #[serde(default = "default_audio_format")]
    pub format: String,
}

fn default_sample_rate() -> u32 {
    paroli_protocol::SAMPLE_RATE
}

fn default_flush_ms() -> u64 {
    100
}

fn default_audio_format() -> String {
    "pcm".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            flush_ms: default_flush_ms(),
            format: default_audio_format(),
        }
    }
}

impl AudioConfig {
    pub fn format(&self) -> AudioFormat {
        AudioFormat::pcm16_mono(self.sample_rate)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_ms)
    }

    /// Encoding to request; `None` omits the field entirely
    pub fn encoding(&self) -> Result<Option<AudioEncoding>, paroli_protocol::ProtocolError> {
        match self.format.trim() {
            "" => Ok(None),
            tag => tag.parse().map(Some),
        }
    }
}

/// Per-request defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SynthesisConfig {
    /// Speaker name or id
    #[serde(default)]
    pub speaker: Option<String>,

    #[serde(default)]
    pub length_scale: Option<f32>,

    #[serde(default)]
    pub noise_scale: Option<f32>,

    #[serde(default)]
    pub noise_w: Option<f32>,
}

impl SynthesisConfig {
    /// Applies the prosody defaults to a request under construction
    pub fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .with_length_scale(self.length_scale)
            .with_noise_scale(self.noise_scale)
            .with_noise_w(self.noise_w)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
