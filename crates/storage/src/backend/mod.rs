//! The [`StorageBackend`] seam between the archive root and its users.
//!
//! [`LocalBackend`] is the only production implementation; `MockBackend`
//! (behind the `mock` feature) keeps everything in memory.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::error::Result;
use crate::file::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// File access below an archive root.
///
/// Every path is archive-relative and goes through
/// [`validate_path`](crate::validate_path) before it touches anything, so a
/// field value or entity type name can never address a file outside the root.
///
/// ```
/// use std::path::Path;
/// use sgarchive_storage::{backend::StorageBackend, error::Result};
///
/// async fn archived_bytes(backend: &dyn StorageBackend, entity_type: &str) -> Result<u64> {
///     let store = Path::new("records").join(format!("{entity_type}.json"));
///     match backend.exists(&store).await? {
///         true => Ok(backend.stat(&store).await?.size),
///         false => Ok(0),
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Label for log output.
    fn name(&self) -> &str;

    /// [`list_stream()`](Self::list_stream), collected.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Every file below `prefix` (compared by path component), or below the
    /// root when there is none. A prefix with nothing under it is an empty
    /// listing. Writes still being staged are not files yet and never show up.
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// use std::path::Path;
    /// # use sgarchive_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.list_stream(Some(Path::new("records")));
    /// while let Some(info) = stream.try_next().await? {
    ///     println!("{}: {} bytes", info.path.display(), info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Whether a file is stored at `path`.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Whole contents of the file at `path`, or
    /// [`NotFound`](crate::error::ErrorKind::NotFound).
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Store `data` at `path`, creating directories on the way and replacing
    /// whatever was there. Readers, and whatever survives a crash, see either
    /// the old file or the new one in full.
    ///
    /// ```no_run
    /// use std::path::Path;
    /// # use sgarchive_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// backend.write(Path::new("schema.json"), b"{}").await?;
    /// # Ok(())
    /// # }
    /// ```
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Remove one file; [`NotFound`](crate::error::ErrorKind::NotFound) if
    /// there is none.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Remove everything below `prefix`. Nothing there is not an error.
    async fn delete_all(&self, prefix: &Path) -> Result<()>;

    /// Size and modification time of the file at `path`.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;
}
