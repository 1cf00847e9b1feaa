use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Prefix of the plain-text errors some servers send instead of JSON
const PLAIN_ERROR_PREFIX: &str = "ERROR:";

/// JSON status message sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFrame {
    /// `"ok"` or an error indicator
    pub status: String,
    #[serde(default, alias = "detail", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusFrame {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Human readable detail, falling back to the raw status
    pub fn detail(&self) -> &str {
        self.message.as_deref().unwrap_or(&self.status)
    }
}

impl fmt::Display for StatusFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.status, message),
            None => f.write_str(&self.status),
        }
    }
}

/// A classified inbound websocket message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Request acknowledged, audio follows
    StatusOk,
    /// Server-side failure; the connection stays usable
    StatusError(StatusFrame),
    /// Raw PCM in the session format, never empty
    AudioChunk(Vec<u8>),
    /// Zero-length binary keepalive
    EmptyFrame,
}

impl InboundFrame {
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        let trimmed = text.trim();
        if let Some(detail) = trimmed.strip_prefix(PLAIN_ERROR_PREFIX) {
            return Ok(Self::StatusError(StatusFrame::error(detail.trim())));
        }

        let status: StatusFrame = serde_json::from_str(trimmed)
            .map_err(|e| ProtocolError::MalformedFrame(format!("{} in {:?}", e, truncate(trimmed))))?;
        if status.is_ok() {
            Ok(Self::StatusOk)
        } else {
            Ok(Self::StatusError(status))
        }
    }

    pub fn from_binary(data: Vec<u8>) -> Self {
        if data.is_empty() {
            Self::EmptyFrame
        } else {
            Self::AudioChunk(data)
        }
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(64) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_status() {
        assert_eq!(
            InboundFrame::from_text(r#"{"status":"ok"}"#).unwrap(),
            InboundFrame::StatusOk
        );
    }

    #[test]
    fn test_error_status_keeps_message() {
        let frame =
            InboundFrame::from_text(r#"{"status":"error","message":"voice not found"}"#).unwrap();
        match frame {
            InboundFrame::StatusError(status) => {
                assert_eq!(status.detail(), "voice not found");
                assert_eq!(status.to_string(), "error: voice not found");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_plain_text_error() {
        let frame = InboundFrame::from_text("ERROR: Speaker ID is out of range").unwrap();
        assert_eq!(
            frame,
            InboundFrame::StatusError(StatusFrame::error("Speaker ID is out of range"))
        );
    }

    #[test]
    fn test_missing_status_field_is_malformed() {
        let err = InboundFrame::from_text(r#"{"message":"hi"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
    }

    #[test]
    fn test_garbage_text_is_malformed() {
        let long = "x".repeat(500);
        let err = InboundFrame::from_text(&long).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(msg) if msg.len() < 200));
    }

    #[test]
    fn test_empty_binary_is_keepalive() {
        assert_eq!(InboundFrame::from_binary(Vec::new()), InboundFrame::EmptyFrame);
        assert_eq!(
            InboundFrame::from_binary(vec![1, 2]),
            InboundFrame::AudioChunk(vec![1, 2])
        );
    }
}
