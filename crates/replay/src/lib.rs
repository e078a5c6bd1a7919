//! Offline queries against an archive root.
//!
//! A [`Snapshot`] reads the cached schema and record stores written by
//! `sgarchive-archive` and answers `find`, `find_one` and `summarize` the way
//! the remote service would, without touching the network. Attachment
//! references in results are rewritten to `file://` URIs of the archived
//! copies.
//!
//! Tables are loaded whole and filtered with a linear scan. Filter
//! evaluation sits behind the [`Evaluator`] trait so an indexed
//! implementation can replace [`LinearScan`] without changing callers.

pub mod error;
mod evaluate;
mod rewrite;
mod snapshot;
mod summary;

pub use crate::evaluate::{Evaluator, LinearScan, field_value};
pub use crate::rewrite::{file_uri, localize};
pub use crate::snapshot::{FindOptions, LoadStatus, Snapshot};
