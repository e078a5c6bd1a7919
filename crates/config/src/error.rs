//! Configuration Error Types
//!
//! All of these are fatal: nothing is archived or queried until the
//! configuration loads and validates.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The main document is missing or could not be merged and extracted.
    #[display("failed to load configuration: {_0}")]
    Load(#[error(not(source))] String),
    /// The connection document referenced by `connection_file` is unusable.
    #[display("failed to load connection file {}: {_1}", _0.display())]
    ConnectionFile(#[error(not(source))] PathBuf, #[error(not(source))] String),
    /// The configuration loaded but its values make no sense.
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
}
