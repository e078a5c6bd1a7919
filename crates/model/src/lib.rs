//! Shared data model for archived records.
//!
//! Every other crate in the workspace speaks in terms of these types: the
//! serializer produces [`Record`]s made of [`Value`]s, the archiver persists
//! them keyed by id, and the replay layer evaluates [`Filter`]s against them.
//!
//! # Architecture
//! - **Values**: one tagged variant over scalars, entity references,
//!   attachment descriptors and lists. No runtime type sniffing downstream.
//! - **Schema**: entity types and their fields, as filtered and cached on disk.
//! - **Queries**: filter triples, sort order and summary requests, shared by
//!   the remote client and the offline replay layer.

pub mod error;
mod query;
mod record;
mod schema;
mod value;

pub use crate::query::{Direction, Filter, Operator, Order, SummaryField, SummaryKind};
pub use crate::record::{Entity, Record, RecordStore};
pub use crate::schema::{DataType, EntitySchema, FieldSchema, Schema};
pub use crate::value::{Attachment, EntityRef, Value};

/// Field name carrying the record identifier in remote payloads and results.
pub const ID_FIELD: &str = "id";
/// Field name carrying the entity type in remote payloads and results.
pub const TYPE_FIELD: &str = "type";
/// Entity type of the records that hold files linked through entity fields.
pub const ATTACHMENT_ENTITY_TYPE: &str = "Attachment";
/// Field of an `Attachment` record holding the file itself.
pub const ATTACHMENT_FILE_FIELD: &str = "this_file";
