use std::path::PathBuf;
use time::OffsetDateTime;

/// File metadata returned by storage backends, used for listing archived
/// record stores and attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from the archive root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: impl Into<OffsetDateTime>) -> Self {
        Self { path: path.into(), size, modified: modified.into() }
    }

    /// File name without its final extension (`records/Shot.json` → `Shot`).
    pub fn stem(&self) -> Option<&str> {
        self.path.file_stem()?.to_str()
    }
}
