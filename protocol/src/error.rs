use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Rejected on the client before anything touches the network
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("failed to encode request: {0}")]
    Encode(String),
}

impl ProtocolError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}
