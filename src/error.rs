//! Error type shared by the library modules.

use thiserror::Error;

/// Errors raised while decoding feed payloads or talking to the upstream service.
#[derive(Debug, Error)]
pub enum ObserverError {
    /// A feed payload was not valid JSON or did not match the expected shape.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// A feed payload parsed but failed validation.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The live feed has been closed; no further updates are accepted.
    #[error("live feed is closed")]
    FeedClosed,

    /// Transport-level failure talking to the upstream service.
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The upstream service answered with a non-success status.
    #[error("upstream returned {status} for {url}")]
    Status { status: u16, url: String },

    /// A date or time parameter could not be parsed.
    #[error("invalid date or time: {0}")]
    InvalidDate(String),
}

pub type Result<T> = std::result::Result<T, ObserverError>;
