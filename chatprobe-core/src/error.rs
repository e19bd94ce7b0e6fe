//! Error types for chatprobe-core

use thiserror::Error;

/// Main error type for the chatprobe-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level failure (connect, TLS, body read)
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The service answered with a non-success status
    #[error("API error ({status}) from {url}: {body}")]
    Api {
        status: u16,
        url: String,
        body: String,
    },

    /// A reply did not match any recognized chat shape
    #[error("unrecognized chat response shape: {preview}")]
    Shape { preview: String },

    /// A reply carried no usable remote identifier
    #[error("no {what} id in response: {preview}")]
    MissingId { what: String, preview: String },

    /// Server-side file processing reported failure
    #[error("file processing failed for {file_id}")]
    ProcessingFailed { file_id: String },

    /// A step is still waiting on the remote service
    #[error("{0} not ready yet")]
    NotReady(String),

    /// A bounded poll ran out of attempts or time
    #[error("{operation} timed out after {attempts} attempts")]
    Timeout { operation: String, attempts: u32 },

    /// The final chat state failed a UI consistency check
    #[error("verification failed: {0}")]
    Verification(String),
}

impl Error {
    /// HTTP status of an API error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

/// Result type alias for chatprobe-core
pub type Result<T> = std::result::Result<T, Error>;

/// 404/405 from a multi-endpoint probe: try the next endpoint
pub fn is_endpoint_fallthrough(error: &Error) -> bool {
    matches!(error.status(), Some(404 | 405))
}

/// Conflict-ish statuses the knowledge service returns while a file settles
pub fn is_transient_attach_error(error: &Error) -> bool {
    matches!(error.status(), Some(409 | 422 | 425 | 503))
}

/// Builds a payload preview capped at `max_chars` characters
pub fn preview(value: &serde_json::Value, max_chars: usize) -> String {
    let raw = value.to_string();
    match raw.char_indices().nth(max_chars) {
        Some((idx, _)) => raw[..idx].to_string(),
        None => raw,
    }
}
