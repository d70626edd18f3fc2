//! Error types for B2 operations

use thiserror::Error;

/// Result alias for B2 operations
pub type Result<T> = std::result::Result<T, B2Error>;

/// Errors surfaced by the session cache and the uploader
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum B2Error {
    /// Account authorization was rejected or returned an unusable body.
    #[error("failed to authorize account: {0}")]
    Credential(String),

    /// Non-2xx reply carrying the backend's own detail.
    #[error("b2 returned {status}: {body}")]
    Backend { status: u16, body: String },

    /// The upload target's token was rejected mid-upload.
    #[error("unauthorized")]
    Unauthorized,

    #[error("request timeout")]
    Timeout,

    #[error("too many requests")]
    RateLimited,

    /// The backend could not be reached at all.
    #[error("failed to reach b2: {0}")]
    Transport(String),

    /// A 2xx reply whose body is missing required fields.
    #[error("malformed b2 response: {0}")]
    MalformedResponse(String),

    #[error("upload cancelled")]
    Cancelled,
}

impl B2Error {
    /// Whether the uploader may spend another attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            B2Error::Backend { .. }
                | B2Error::Unauthorized
                | B2Error::Timeout
                | B2Error::RateLimited
                | B2Error::Transport(_)
        )
    }
}

/// The request never produced an HTTP reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError(err.to_string())
    }
}
