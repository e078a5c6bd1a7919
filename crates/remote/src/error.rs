//! Remote Service Error Types

use derive_more::{Display, Error};

/// A remote service error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote service operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection refused, reset or timed out before a response arrived.
    #[display("transport error: {_0}")]
    Transport(#[error(not(source))] String),
    /// The server answered with a non-success status code.
    #[display("HTTP {status} from {url}")]
    Http { status: u16, url: String },
    /// The server understood the request and rejected it.
    #[display("API error {code}: {message}")]
    Api { code: i64, message: String },
    /// The response did not have the expected shape.
    #[display("unexpected response: {_0}")]
    Protocol(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Api { .. } | Self::Protocol(_) => false,
        }
    }
}

impl From<reqwest::Error> for ErrorKind {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Protocol(err.to_string());
        }
        match err.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
                url: err.url().map(ToString::to_string).unwrap_or_default(),
            },
            None => Self::Transport(err.to_string()),
        }
    }
}
