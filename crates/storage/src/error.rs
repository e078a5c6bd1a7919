//! Storage Error Types
//!
//! Errors raised while reading or writing the archive root. Callers in the
//! archiver raise these into their own error kinds, keeping the original as
//! a child.

use derive_more::{Display, Error};
use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("no such file in the archive root: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Not a usable archive-relative path: empty, traversing out of the root,
    /// containing null bytes, or naming an in-flight temporary file.
    #[display("invalid archive path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// A path on disk that does not live below the archive root.
    #[display("{} is outside the archive root", _0.display())]
    OutsideRoot(#[error(not(source))] PathBuf),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Local I/O is not retried, except for the few errors that say so
    /// themselves.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(e) => {
                matches!(e.kind(), IoErrorKind::Interrupted | IoErrorKind::WouldBlock | IoErrorKind::TimedOut)
            },
            _ => false,
        }
    }
}
