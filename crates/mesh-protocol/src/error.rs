use thiserror::Error;

/// Errors raised while decoding or validating exchange envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("unsupported message kind '{0}'")]
    UnsupportedKind(String),
}

impl ProtocolError {
    /// Short machine-readable code reported back to the sending peer.
    pub fn code(&self) -> String {
        match self {
            ProtocolError::Json(_) => crate::INVALID_JSON.to_string(),
            ProtocolError::UnsupportedKind(_) => crate::UNSUPPORTED_KIND.to_string(),
            ProtocolError::InvalidEnvelope(msg) => msg.clone(),
        }
    }
}
