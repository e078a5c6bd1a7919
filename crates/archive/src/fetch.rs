//! Attachment downloads.

use crate::error::ErrorKind;
use crate::layout;
use exn::{OptionExt, ResultExt};
use sgarchive_config::{Config, DownloadMode};
use sgarchive_model::{ATTACHMENT_FILE_FIELD, Attachment};
use sgarchive_remote::RemoteService;
use sgarchive_storage::StorageBackend;
use std::ops::AddAssign;
use std::path::PathBuf;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Downloaded,
    /// The file extension is excluded for this field; nothing was fetched.
    SkippedExcluded,
    /// A local copy already exists and was kept.
    SkippedExists,
    /// Downloads are switched off and there is no local copy.
    SkippedDisabled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub status: FetchStatus,
    /// Set whenever the file is present in the archive root afterwards.
    pub local_path: Option<PathBuf>,
}
impl FetchResult {
    fn new(status: FetchStatus, local_path: Option<PathBuf>) -> Self {
        Self { status, local_path }
    }
}

/// Tally of [`FetchStatus`]es.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachmentCounts {
    pub downloaded: usize,
    pub skipped_excluded: usize,
    pub skipped_exists: usize,
    pub skipped_disabled: usize,
    pub failed: usize,
}
impl AttachmentCounts {
    pub fn record(&mut self, status: FetchStatus) {
        match status {
            FetchStatus::Downloaded => self.downloaded += 1,
            FetchStatus::SkippedExcluded => self.skipped_excluded += 1,
            FetchStatus::SkippedExists => self.skipped_exists += 1,
            FetchStatus::SkippedDisabled => self.skipped_disabled += 1,
            FetchStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.downloaded + self.skipped_excluded + self.skipped_exists + self.skipped_disabled + self.failed
    }
}
impl AddAssign for AttachmentCounts {
    fn add_assign(&mut self, other: Self) {
        self.downloaded += other.downloaded;
        self.skipped_excluded += other.skipped_excluded;
        self.skipped_exists += other.skipped_exists;
        self.skipped_disabled += other.skipped_disabled;
        self.failed += other.failed;
    }
}

/// Make sure the file behind `attachment` is present in the archive root,
/// as far as `archive.download` allows.
///
/// Files of linked `Attachment` records are stored once per `Attachment`
/// record rather than per referencing field. Extension exclusions still
/// apply to the referencing `entity_type` and `field`.
///
/// Never fails: transport and storage errors are logged and reported as
/// [`FetchStatus::Failed`], so that one broken attachment can't abort a page.
#[instrument(level = "debug", skip(attachment, storage, remote, config), fields(url = attachment.url.as_deref()))]
pub async fn fetch(
    attachment: &Attachment,
    entity_type: &str,
    field: &str,
    record_id: u64,
    storage: &dyn StorageBackend,
    remote: &dyn RemoteService,
    config: &Config,
) -> FetchResult {
    if let Some(extension) = attachment.extension()
        && config.ignored.is_extension_excluded(entity_type, field, extension)
    {
        tracing::debug!(extension, "extension excluded, not downloading");
        return FetchResult::new(FetchStatus::SkippedExcluded, None);
    }
    let path = match &attachment.entity {
        Some(linked) => {
            layout::attachment_path(&linked.entity_type, ATTACHMENT_FILE_FIELD, linked.id, attachment.file_name())
        },
        None => layout::attachment_path(entity_type, field, record_id, attachment.file_name()),
    };

    let existed = match storage.exists(&path).await {
        Ok(existed) => existed,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = ?e, "could not check for existing attachment");
            return FetchResult::new(FetchStatus::Failed, None);
        },
    };
    match (config.archive.download, existed) {
        (DownloadMode::Missing | DownloadMode::None, true) => {
            return FetchResult::new(FetchStatus::SkippedExists, Some(path));
        },
        (DownloadMode::None, false) => return FetchResult::new(FetchStatus::SkippedDisabled, None),
        (DownloadMode::Missing, false) | (DownloadMode::All, _) => {},
    }

    let download = async {
        let url = attachment.url.as_deref().ok_or_raise(|| ErrorKind::Fetch)?;
        let bytes = remote.download(url).await.or_raise(|| ErrorKind::Fetch)?;
        storage.write(&path, &bytes).await.or_raise(|| ErrorKind::Storage)?;
        Ok::<_, exn::Exn<ErrorKind>>(bytes.len())
    };
    match download.await {
        Ok(size) => {
            tracing::debug!(path = %path.display(), size, "attachment downloaded");
            FetchResult::new(FetchStatus::Downloaded, Some(path))
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = ?e, "attachment download failed");
            // A previous copy is still in place.
            FetchResult::new(FetchStatus::Failed, existed.then_some(path))
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sgarchive_config::{ArchiveOptions, Connection, Html, Ignored};
    use sgarchive_model::EntityRef;
    use sgarchive_remote::MockService;
    use sgarchive_storage::backend::MockBackend;
    use std::collections::BTreeMap;
    use std::path::Path;

    pub(crate) fn config() -> Config {
        let mut ignored = Ignored::default();
        ignored
            .file_exts
            .insert("Version".to_string(), BTreeMap::from([("sg_uploaded_movie".to_string(), vec![".mov".to_string()])]));
        Config {
            connection: Connection {
                base_url: "https://studio.example.com".to_string(),
                script_name: "archiver".to_string(),
                api_key: "secret".to_string(),
                timeout_secs: 60,
            },
            ignored,
            filters: BTreeMap::new(),
            html: Html::default(),
            archive: ArchiveOptions::default(),
        }
    }

    fn thumbnail() -> Attachment {
        let mut attachment = Attachment::new("https://cdn.example.com/sh010.jpg");
        attachment.name = Some("sh010.jpg".to_string());
        attachment
    }

    #[tokio::test]
    async fn test_downloads_then_skips() {
        let remote = MockService::default().with_blob("https://cdn.example.com/sh010.jpg", *b"jpeg");
        let storage = MockBackend::default();
        let config = config();

        let result = fetch(&thumbnail(), "Version", "image", 7, &storage, &remote, &config).await;
        assert_eq!(result.status, FetchStatus::Downloaded);
        let path = result.local_path.unwrap();
        assert_eq!(path, Path::new("attachments/Version/image/7-sh010.jpg"));
        assert_eq!(storage.contents(&path).await.unwrap(), b"jpeg");

        let result = fetch(&thumbnail(), "Version", "image", 7, &storage, &remote, &config).await;
        assert_eq!(result.status, FetchStatus::SkippedExists);
        assert_eq!(result.local_path, Some(path));
        assert_eq!(remote.downloads().len(), 1);
    }

    #[tokio::test]
    async fn test_download_all_replaces_local_copy() {
        let remote = MockService::default().with_blob("https://cdn.example.com/sh010.jpg", *b"jpeg");
        let storage = MockBackend::with_files([("attachments/Version/image/7-sh010.jpg", Vec::from(*b"old"))]);
        let mut config = config();
        config.archive.download = DownloadMode::All;

        let result = fetch(&thumbnail(), "Version", "image", 7, &storage, &remote, &config).await;
        assert_eq!(result.status, FetchStatus::Downloaded);
        assert_eq!(storage.contents("attachments/Version/image/7-sh010.jpg").await.unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_failed_redownload_keeps_local_copy() {
        let remote = MockService::default();
        let storage = MockBackend::with_files([("attachments/Version/image/7-sh010.jpg", Vec::from(*b"old"))]);
        let mut config = config();
        config.archive.download = DownloadMode::All;

        let result = fetch(&thumbnail(), "Version", "image", 7, &storage, &remote, &config).await;
        assert_eq!(result.status, FetchStatus::Failed);
        assert_eq!(result.local_path.as_deref(), Some(Path::new("attachments/Version/image/7-sh010.jpg")));
        assert_eq!(storage.contents("attachments/Version/image/7-sh010.jpg").await.unwrap(), b"old");
        assert_eq!(remote.downloads().len(), 1);
    }

    #[tokio::test]
    async fn test_download_none() {
        let remote = MockService::default().with_blob("https://cdn.example.com/sh010.jpg", *b"jpeg");
        let storage = MockBackend::with_files([("attachments/Version/image/8-sh010.jpg", Vec::from(*b"old"))]);
        let mut config = config();
        config.archive.download = DownloadMode::None;

        let result = fetch(&thumbnail(), "Version", "image", 7, &storage, &remote, &config).await;
        assert_eq!(result, FetchResult::new(FetchStatus::SkippedDisabled, None));
        let result = fetch(&thumbnail(), "Version", "image", 8, &storage, &remote, &config).await;
        assert_eq!(result.status, FetchStatus::SkippedExists);
        assert_eq!(result.local_path.as_deref(), Some(Path::new("attachments/Version/image/8-sh010.jpg")));
        assert!(remote.downloads().is_empty());
    }

    #[tokio::test]
    async fn test_linked_file_is_stored_once_per_attachment_record() {
        let url = "https://studio.example.com/file_serve/attachment/31";
        let remote = MockService::default().with_blob(url, *b"%PDF");
        let storage = MockBackend::default();
        let mut notes = Attachment::new(url).linked_to(EntityRef::new("Attachment", 31));
        notes.name = Some("notes.pdf".to_string());

        let result = fetch(&notes, "Shot", "sg_attachments", 7, &storage, &remote, &config()).await;
        assert_eq!(result.status, FetchStatus::Downloaded);
        assert_eq!(result.local_path.as_deref(), Some(Path::new("attachments/Attachment/this_file/31-notes.pdf")));
        // Another record linking the same file finds it in place.
        let result = fetch(&notes, "Version", "sg_attachments", 9, &storage, &remote, &config()).await;
        assert_eq!(result.status, FetchStatus::SkippedExists);
        assert_eq!(remote.downloads().len(), 1);
    }

    #[tokio::test]
    async fn test_excluded_extension() {
        let remote = MockService::default();
        let storage = MockBackend::default();
        let mut movie = Attachment::new("https://studio.example.com/file_serve/attachment/99");
        movie.name = Some("sh010_comp_v003.MOV".to_string());

        let result = fetch(&movie, "Version", "sg_uploaded_movie", 7, &storage, &remote, &config()).await;
        assert_eq!(result, FetchResult::new(FetchStatus::SkippedExcluded, None));
        assert!(remote.downloads().is_empty());
        assert!(storage.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_reported_not_raised() {
        let remote = MockService::default();
        let storage = MockBackend::default();
        let result = fetch(&thumbnail(), "Version", "image", 7, &storage, &remote, &config()).await;
        assert_eq!(result, FetchResult::new(FetchStatus::Failed, None));
    }

    #[test]
    fn test_counts() {
        let mut counts = AttachmentCounts::default();
        counts.record(FetchStatus::Downloaded);
        counts.record(FetchStatus::Failed);
        counts.record(FetchStatus::SkippedDisabled);
        counts += AttachmentCounts { skipped_exists: 2, ..Default::default() };
        assert_eq!(counts.total(), 5);
        assert_eq!(counts.skipped_disabled, 1);
        assert_eq!(counts.skipped_exists, 2);
    }
}
