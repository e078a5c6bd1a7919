//! Archive root on the local filesystem.
//!
//! Writes are staged in a hidden sibling (see [`PARTIAL_SUFFIX`]), flushed
//! to disk and renamed over the target. A crash mid-write leaves at most a
//! stray staging file behind, which is never listed, never a truncated
//! record store or attachment.

use crate::backend::FileInfoStream;
use crate::error::{ErrorKind, Result};
use crate::path::{PARTIAL_SUFFIX, is_partial, validate as validate_path};
use crate::{FileInfo, StorageBackend};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::Metadata;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

static STAGED_WRITES: AtomicU64 = AtomicU64::new(0);

/// An archive root directory on the local filesystem.
///
/// # Examples
///
/// ```no_run
/// use sgarchive_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("archive", "/srv/archives/studio")?;
/// assert_eq!(backend.root().to_str(), Some("/srv/archives/studio"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}
impl LocalBackend {
    /// Open (and create, if needed) the archive root at `root`.
    ///
    /// # Errors
    ///
    /// [`InvalidPath`](ErrorKind::InvalidPath) when `root` is relative or
    /// names something other than a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_absolute() || (root.exists() && !root.is_dir()) {
            exn::bail!(ErrorKind::InvalidPath(root.to_path_buf()));
        }
        // Blocking, but only ever once per process.
        std::fs::create_dir_all(root).map_err(|e| io_error(e, root))?;
        Ok(Self { name: name.into(), root: root.to_path_buf() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(path)?))
    }

    fn archive_path(&self, absolute: &Path) -> Result<PathBuf> {
        let relative = absolute.strip_prefix(&self.root).or_raise(|| ErrorKind::OutsideRoot(absolute.to_path_buf()))?;
        validate_path(relative)
    }

    /// Hidden sibling of `target` that a write is staged in, unique within
    /// the process and across concurrent processes.
    fn staging_path(target: &Path) -> PathBuf {
        let n = STAGED_WRITES.fetch_add(1, Ordering::Relaxed);
        let name = target.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
        target.with_file_name(format!(".{name}.{}-{n}{PARTIAL_SUFFIX}", std::process::id()))
    }

    async fn stage(staging: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = File::create(staging).await?;
        file.write_all(data).await?;
        file.sync_all().await
    }

    fn file_info(path: PathBuf, metadata: &Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?;
        Ok(FileInfo::new(path, metadata.len(), modified))
    }
}

fn io_error(e: std::io::Error, path: &Path) -> ErrorKind {
    match e.kind() {
        IoErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
        IoErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
        _ => ErrorKind::Io(e),
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    /// Walks only the part of the tree below `prefix`, depth first.
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let start = match prefix.map(|prefix| self.resolve(prefix)).transpose() {
            Ok(start) => start.unwrap_or_else(|| self.root.clone()),
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        Box::pin(stream!({
            let mut pending = vec![start];
            while let Some(current) = pending.pop() {
                if is_partial(&current) {
                    continue;
                }
                let metadata = match fs::metadata(&current).await {
                    Ok(metadata) => metadata,
                    // Missing prefixes list as empty; broken symlinks are skipped.
                    Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                    Err(e) => {
                        yield Err(exn::Exn::from(io_error(e, &current)));
                        continue;
                    },
                };
                if metadata.is_file() {
                    yield self.archive_path(&current).and_then(|path| Self::file_info(path, &metadata));
                    continue;
                }
                if !metadata.is_dir() {
                    continue;
                }
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        yield Err(exn::Exn::from(io_error(e, &current)));
                        continue;
                    },
                };
                loop {
                    match entries.next_entry().await {
                        Ok(Some(entry)) => pending.push(entry.path()),
                        Ok(None) => break,
                        Err(e) => {
                            yield Err(exn::Exn::from(io_error(e, &current)));
                            break;
                        },
                    }
                }
            }
        }))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let absolute = self.resolve(path)?;
        Ok(fs::try_exists(&absolute).await.map_err(|e| io_error(e, path))?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let absolute = self.resolve(path)?;
        Ok(fs::read(&absolute).await.map_err(|e| io_error(e, path))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let absolute = self.resolve(path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await.map_err(|e| io_error(e, path))?;
        }
        let staging = Self::staging_path(&absolute);
        let committed = match Self::stage(&staging, data).await {
            Ok(()) => fs::rename(&staging, &absolute).await,
            Err(e) => Err(e),
        };
        if let Err(e) = committed {
            let _ = fs::remove_file(&staging).await;
            exn::bail!(io_error(e, path));
        }
        tracing::trace!(path = %path.display(), size = data.len(), "written");
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let absolute = self.resolve(path)?;
        Ok(fs::remove_file(&absolute).await.map_err(|e| io_error(e, path))?)
    }

    async fn delete_all(&self, prefix: &Path) -> Result<()> {
        let absolute = self.resolve(prefix)?;
        let removed = match fs::symlink_metadata(&absolute).await {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(&absolute).await,
            Ok(_) => fs::remove_file(&absolute).await,
            Err(e) => Err(e),
        };
        match removed {
            Err(e) if e.kind() != IoErrorKind::NotFound => exn::bail!(io_error(e, prefix)),
            _ => Ok(()),
        }
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let absolute = self.resolve(path)?;
        let metadata = fs::metadata(&absolute).await.map_err(|e| io_error(e, path))?;
        Self::file_info(validate_path(path)?, &metadata)
    }
}
