//! Archive Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Remote and storage failures are raised as
//! [`ErrorKind::Remote`] and [`ErrorKind::Storage`] with the originating
//! error attached as a child.

use derive_more::{Display, Error};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// ### Fatal for the run
/// - [`ErrorKind::SchemaMissing`]
/// - [`ErrorKind::CorruptSchema`]
/// - [`ErrorKind::UnknownEntityType`]
///
/// ### Fatal for one entity type
/// - [`ErrorKind::CorruptStore`]
/// - [`ErrorKind::Remote`]
/// - [`ErrorKind::Storage`]
/// - [`ErrorKind::StrictCheck`]
///
/// ### Logged and counted
/// - [`ErrorKind::InvalidRecord`]
/// - [`ErrorKind::Fetch`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No schema has been cached in the archive root yet.
    #[display("no schema cached in the archive root")]
    SchemaMissing,
    #[display("cached schema could not be parsed")]
    CorruptSchema,
    /// A record store exists but could not be parsed; it is left untouched.
    #[display("record store for {_0} could not be parsed")]
    CorruptStore(#[error(not(source))] String),
    #[display("entity type {_0} is not in the schema")]
    UnknownEntityType(#[error(not(source))] String),
    /// A remote record could not be serialized (it has no numeric id).
    #[display("invalid {_0} record")]
    InvalidRecord(#[error(not(source))] String),
    #[display("remote service error")]
    Remote,
    #[display("storage error")]
    Storage,
    #[display("attachment download failed")]
    Fetch,
    /// A record store read back after writing differs from what was
    /// written.
    #[display("record store for {_0} did not read back as written")]
    StrictCheck(#[error(not(source))] String),
    /// Cancelled while waiting to retry.
    #[display("cancelled")]
    Cancelled,
}
