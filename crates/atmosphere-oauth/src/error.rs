use thiserror::Error;

use atmosphere_client::{Did, IdentifierError};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    InvalidIdentifier(#[from] IdentifierError),

    #[error("Failed to bind callback listener: {0}")]
    ListenerBind(String),

    #[error("OAuth callback timed out after 5 minutes")]
    CallbackTimeout,

    #[error("Authorization was cancelled before completion")]
    AuthorizationCancelled,

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("No stored session for {0}")]
    SessionNotFound(Did),

    #[error("Stored session for {0} can no longer be refreshed")]
    SessionExpired(Did),

    #[error("Session store error: {0}")]
    Store(String),

    #[error("Failed to open the user agent: {0}")]
    Browser(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
