//! Error types for the MentorLink call core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Token fetch failed: {0}")]
    TokenFetch(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Session is no longer valid: {0}")]
    SessionInvalid(String),

    #[error("Media device error: {0}")]
    MediaDevice(String),

    #[error("Message delivery failed: {0}")]
    MessagingDelivery(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a bounded retry is allowed to absorb this failure.
    ///
    /// "Not found" class failures (`SessionInvalid`) are terminal: the session
    /// was torn down and retrying cannot bring it back. Transport blips and
    /// generic session errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Session(_) | Error::Http(_) | Error::WebSocket(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e.to_string())
    }
}
