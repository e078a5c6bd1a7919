//! Mirror a remote production-tracking database into an archive root.
//!
//! # Architecture
//! - **[`schema`]**: fetches, filters and caches the remote schema.
//! - **[`serialize`]**: turns raw remote records into persisted [`Record`](sgarchive_model::Record)s.
//! - **[`fetch`]**: downloads attachments to their deterministic location.
//! - **[`Archiver`]**: pages through each entity type, driving the above and
//!   committing one page at a time.
//! - **[`layout`]**: the on-disk layout shared with the replay layer.

mod archive;
pub mod error;
pub mod fetch;
pub mod layout;
pub mod schema;
pub mod serialize;

pub use crate::archive::{
    ArchiveEvent, ArchiveSummary, Archiver, RunStatus, SELECT_ALL, SELECT_MISSING, TypeOutcome, TypeSummary,
};
pub use crate::fetch::{AttachmentCounts, FetchResult, FetchStatus};
