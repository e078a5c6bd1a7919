//! Archive root held in memory, for tests of the archiver and replay layer.

use super::FileInfoStream;
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use crate::path::validate as validate_path;
use async_trait::async_trait;
use futures::{StreamExt, stream};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::sync::RwLock;

struct Stored {
    modified: UtcDateTime,
    data: Vec<u8>,
}
impl Stored {
    fn info(&self, path: &Path) -> FileInfo {
        FileInfo::new(path, self.data.len() as u64, self.modified)
    }
}

#[derive(Default)]
struct State {
    files: BTreeMap<PathBuf, Stored>,
    read_only: Vec<PathBuf>,
    truncating: Vec<PathBuf>,
}

/// In-memory [`StorageBackend`].
///
/// Listings come back in path order. Prefixes passed to
/// [`fail_writes_under()`](Self::fail_writes_under) turn every later write
/// below them into a permission error, for exercising store failures.
/// Prefixes passed to [`truncate_writes_under()`](Self::truncate_writes_under)
/// make later writes below them succeed but keep only half the data.
///
/// # Examples
///
/// ```
/// use sgarchive_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("records/Shot.json", b"{}")]);
/// backend.fail_writes_under("records");
/// assert!(backend.write(Path::new("records/Asset.json"), b"{}").await.is_err());
/// backend.write(Path::new("schema.json"), b"{}").await?;
/// assert_eq!(backend.contents("schema.json").await, Some(b"{}".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MockBackend {
    state: RwLock<State>,
}

impl MockBackend {
    /// Backend seeded with `files`.
    ///
    /// # Panics
    ///
    /// On a path that is not a valid archive path; a broken fixture should
    /// fail loudly.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let modified = UtcDateTime::now();
        let files = files
            .into_iter()
            .map(|(path, data)| {
                let path = path.into();
                match validate_path(&path) {
                    Ok(path) => (path, Stored { modified, data: data.into() }),
                    Err(_) => panic!("MockBackend::with_files: invalid path {}", path.display()),
                }
            })
            .collect();
        Self { state: RwLock::new(State { files, ..Default::default() }) }
    }

    /// Make every subsequent write below `prefix` fail.
    pub fn fail_writes_under(&self, prefix: impl Into<PathBuf>) {
        // Only called from test setup, before anything else holds the lock.
        if let Ok(mut state) = self.state.try_write() {
            state.read_only.push(prefix.into());
        }
    }

    /// Make every subsequent write below `prefix` silently keep only the
    /// first half of the data.
    pub fn truncate_writes_under(&self, prefix: impl Into<PathBuf>) {
        if let Ok(mut state) = self.state.try_write() {
            state.truncating.push(prefix.into());
        }
    }

    pub async fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.state.read().await.files.get(path.as_ref()).map(|stored| stored.data.clone())
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let prefix = match prefix.map(validate_path).transpose() {
            Ok(prefix) => prefix,
            Err(e) => return Box::pin(stream::once(async { Err(e) })),
        };
        // Snapshot under the read lock so nothing is held while the caller polls.
        let snapshot = async move {
            let state = self.state.read().await;
            state
                .files
                .iter()
                .filter(|(path, _)| prefix.as_ref().is_none_or(|prefix| path.starts_with(prefix)))
                .map(|(path, stored)| Ok(stored.info(path)))
                .collect::<Vec<_>>()
        };
        Box::pin(stream::once(snapshot).flat_map(stream::iter))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.state.read().await.files.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        match self.state.read().await.files.get(&path) {
            Some(stored) => Ok(stored.data.clone()),
            None => exn::bail!(ErrorKind::NotFound(path)),
        }
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        let mut state = self.state.write().await;
        if state.read_only.iter().any(|prefix| path.starts_with(prefix)) {
            exn::bail!(ErrorKind::PermissionDenied(path));
        }
        let data = if state.truncating.iter().any(|prefix| path.starts_with(prefix)) {
            &data[..data.len() / 2]
        } else {
            data
        };
        state.files.insert(path, Stored { modified: UtcDateTime::now(), data: data.to_vec() });
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        if self.state.write().await.files.remove(&path).is_none() {
            exn::bail!(ErrorKind::NotFound(path));
        }
        Ok(())
    }

    async fn delete_all(&self, prefix: &Path) -> Result<()> {
        let prefix = validate_path(prefix)?;
        self.state.write().await.files.retain(|path, _| !path.starts_with(&prefix));
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        match self.state.read().await.files.get(&path) {
            Some(stored) => Ok(stored.info(&path)),
            None => exn::bail!(ErrorKind::NotFound(path)),
        }
    }
}
