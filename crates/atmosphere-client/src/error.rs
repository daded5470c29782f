use thiserror::Error;

use crate::identifier::IdentifierError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    InvalidIdentifier(#[from] IdentifierError),

    #[error("Failed to resolve {identifier}: {reason}")]
    Resolution { identifier: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request failed with status {status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    BadResponse {
        status: u16,
        message: Option<String>,
    },

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
