//! Replay Error Types
//!
//! Errors raised while loading an archived snapshot or querying it. Loading
//! errors are per entity type; [`Snapshot::load_entity_types()`] turns them
//! into a status map instead of failing.
//!
//! [`Snapshot::load_entity_types()`]: crate::Snapshot::load_entity_types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The archive root has no cached schema; nothing has been archived yet.
    #[display("no schema cached in the archive root")]
    SchemaMissing,
    #[display("cached schema could not be parsed")]
    CorruptSchema,
    #[display("entity type {_0} is not in the schema")]
    UnknownEntityType(#[error(not(source))] String),
    /// No record store exists for this entity type.
    #[display("entity type {_0} has not been archived")]
    NotArchived(#[error(not(source))] String),
    #[display("record store for {_0} could not be parsed")]
    CorruptStore(#[error(not(source))] String),
    /// The entity type is archived but was never loaded into memory.
    #[display("entity type {_0} is not loaded")]
    NotLoaded(#[error(not(source))] String),
    #[display("storage error")]
    Storage,
}
