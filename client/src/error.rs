use paroli_protocol::{ProtocolError, StatusFrame};
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Validation failure, raised before any network activity
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error: {0}")]
    Server(StatusFrame),

    #[error("audio output error: {0}")]
    Audio(String),

    #[error("speaker directory error: {0}")]
    Directory(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("client is no longer running")]
    Stopped,
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidRequest(msg) | ProtocolError::Encode(msg) => {
                Self::InvalidRequest(msg)
            }
            ProtocolError::MalformedFrame(msg) => Self::Protocol(msg),
        }
    }
}
