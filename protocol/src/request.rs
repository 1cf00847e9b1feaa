use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Encoding the server should use for binary audio frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// Raw little-endian 16-bit PCM
    Pcm,
    /// Ogg/Opus pages
    Opus,
}

impl AudioEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm => "pcm",
            Self::Opus => "opus",
        }
    }
}

impl fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioEncoding {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pcm" | "raw" | "raw-pcm" => Ok(Self::Pcm),
            "opus" => Ok(Self::Opus),
            other => Err(ProtocolError::invalid(format!(
                "unsupported audio format `{}`",
                other
            ))),
        }
    }
}

/// A validated synthesis request, serialized as one outbound text frame.
///
/// Only [`RequestBuilder::build`] and [`SynthesisRequest::from_frame`]
/// produce values, so a request in hand always carries non-empty text and a
/// non-negative speaker id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    text: String,
    /// Always present on the wire; 0 for single-voice models
    #[serde(default)]
    speaker_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio_format: Option<AudioEncoding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length_scale: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    noise_scale: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    noise_w: Option<f32>,
}

impl SynthesisRequest {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn speaker_id(&self) -> i64 {
        self.speaker_id
    }

    pub fn audio_format(&self) -> Option<AudioEncoding> {
        self.audio_format
    }

    pub fn length_scale(&self) -> Option<f32> {
        self.length_scale
    }

    pub fn noise_scale(&self) -> Option<f32> {
        self.noise_scale
    }

    pub fn noise_w(&self) -> Option<f32> {
        self.noise_w
    }

    /// Serialize into the JSON text frame sent to the server
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parse and validate a frame produced by [`SynthesisRequest::to_frame`]
    pub fn from_frame(frame: &str) -> Result<Self, ProtocolError> {
        let request: Self = serde_json::from_str(frame)
            .map_err(|e| ProtocolError::invalid(format!("unparseable request: {}", e)))?;
        request.validate()?;
        Ok(request)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.text.trim().is_empty() {
            return Err(ProtocolError::invalid("text must not be empty"));
        }
        if self.speaker_id < 0 {
            return Err(ProtocolError::invalid(format!(
                "speaker id {} is negative",
                self.speaker_id
            )));
        }
        for (name, value) in [
            ("length_scale", self.length_scale),
            ("noise_scale", self.noise_scale),
            ("noise_w", self.noise_w),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(ProtocolError::invalid(format!(
                        "{} must be a positive number, got {}",
                        name, v
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Collects the loosely-typed inputs of a user action and turns them into a
/// [`SynthesisRequest`].
///
/// The voice is kept as the raw selector value so that parsing failures
/// surface from [`RequestBuilder::build`] rather than at the call site.
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    text: String,
    voice: Option<String>,
    encoding: Option<AudioEncoding>,
    length_scale: Option<f32>,
    noise_scale: Option<f32>,
    noise_w: Option<f32>,
}

impl RequestBuilder {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Voice selector value; empty means the default voice
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_speaker_id(mut self, speaker_id: i64) -> Self {
        self.voice = Some(speaker_id.to_string());
        self
    }

    pub fn with_encoding(mut self, encoding: Option<AudioEncoding>) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_length_scale(mut self, length_scale: Option<f32>) -> Self {
        self.length_scale = length_scale;
        self
    }

    pub fn with_noise_scale(mut self, noise_scale: Option<f32>) -> Self {
        self.noise_scale = noise_scale;
        self
    }

    pub fn with_noise_w(mut self, noise_w: Option<f32>) -> Self {
        self.noise_w = noise_w;
        self
    }

    pub fn build(self) -> Result<SynthesisRequest, ProtocolError> {
        let speaker_id = parse_voice(self.voice.as_deref())?;
        let request = SynthesisRequest {
            text: self.text,
            speaker_id,
            audio_format: self.encoding,
            length_scale: self.length_scale,
            noise_scale: self.noise_scale,
            noise_w: self.noise_w,
        };
        request.validate()?;
        Ok(request)
    }
}

fn parse_voice(voice: Option<&str>) -> Result<i64, ProtocolError> {
    let voice = match voice.map(str::trim) {
        None | Some("") => return Ok(0),
        Some(v) => v,
    };
    voice.parse::<i64>().map_err(|_| {
        ProtocolError::invalid(format!("voice identifier `{}` is not an integer", voice))
    })
}
