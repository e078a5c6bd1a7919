//! Storage for the archive root.
//!
//! Everything the archiver persists (schema, record stores, attachment files)
//! and everything the replay layer reads goes through a [`StorageBackend`].
//! Paths are always relative to the archive root and validated before use.

pub mod backend;
pub mod error;
pub mod file;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::file::FileInfo;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
