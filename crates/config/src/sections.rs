use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use sgarchive_model::DataType;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Where the remote service lives and how to authenticate against it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub base_url: String,
    pub script_name: String,
    pub api_key: String,
    #[serde(default = "Connection::default_timeout_secs")]
    pub timeout_secs: u64,
}
impl Connection {
    const fn default_timeout_secs() -> u64 {
        60
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Connection")
            .field("base_url", &self.base_url)
            .field("script_name", &self.script_name)
            .field("api_key", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Everything that must never make it into an archive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ignored {
    pub entity_types: BTreeSet<String>,
    pub data_types: Vec<DataType>,
    /// Entity type → field names.
    pub fields: BTreeMap<String, BTreeSet<String>>,
    /// Entity type → field name → file extensions that are not downloaded.
    pub file_exts: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}
impl Ignored {
    pub fn is_entity_type_ignored(&self, entity_type: &str) -> bool {
        self.entity_types.contains(entity_type)
    }

    pub fn is_data_type_ignored(&self, data_type: &DataType) -> bool {
        self.data_types.contains(data_type)
    }

    pub fn is_field_ignored(&self, entity_type: &str, field: &str) -> bool {
        self.fields.get(entity_type).is_some_and(|fields| fields.contains(field))
    }

    /// Extensions compare ASCII case-insensitively, with or without a
    /// leading dot on either side.
    pub fn is_extension_excluded(&self, entity_type: &str, field: &str, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.');
        if extension.is_empty() {
            return false;
        }
        self.file_exts
            .get(entity_type)
            .and_then(|fields| fields.get(field))
            .is_some_and(|excluded| {
                excluded.iter().any(|ext| ext.trim_start_matches('.').eq_ignore_ascii_case(extension))
            })
    }
}

/// Display rules for read-only front ends over an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Html {
    /// Entity type → fields shown in listings (and projected by default).
    pub list_fields: BTreeMap<String, Vec<String>>,
    /// Entity types loaded eagerly when a snapshot is opened.
    pub load_entity_type: Vec<String>,
}
impl Html {
    pub fn list_fields(&self, entity_type: &str) -> Option<&[String]> {
        self.list_fields.get(entity_type).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveOptions {
    /// Archive root.
    pub output: PathBuf,
    /// Attachment downloads in flight per page.
    pub concurrency: usize,
    /// Extra attempts for a page fetch that failed with a retryable error.
    pub retries: u32,
    /// Delay before the first retry; doubles for each following attempt.
    pub backoff_ms: u64,
    /// Which attachments to download.
    pub download: DownloadMode,
    /// Read every record store back after writing it and compare.
    pub strict: bool,
}
impl ArchiveOptions {
    /// Upper bound for a single backoff delay.
    pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

    /// Delay before retry number `attempt` (starting at 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor)).min(Self::MAX_BACKOFF)
    }
}
impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            output: PathBuf::from("output"),
            concurrency: 8,
            retries: 3,
            backoff_ms: 500,
            download: DownloadMode::Missing,
            strict: false,
        }
    }
}

/// Which attachment files an archive run downloads.
///
/// Whatever the mode, descriptors keep pointing at files already present in
/// the archive root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    /// Only files without a local copy.
    #[default]
    Missing,
    /// Every file, replacing local copies.
    All,
    /// Nothing; records are archived without their files.
    None,
}
impl FromStr for DownloadMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "missing" => Ok(Self::Missing),
            "all" => Ok(Self::All),
            "none" => Ok(Self::None),
            other => exn::bail!(ErrorKind::Invalid(format!("unknown download mode {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ignored() -> Ignored {
        let mut ignored = Ignored::default();
        ignored.file_exts.insert(
            "Version".to_string(),
            BTreeMap::from([("sg_uploaded_movie".to_string(), vec![".mov".to_string(), "MP4".to_string()])]),
        );
        ignored
    }

    #[rstest]
    #[case("mov", true)]
    #[case(".mov", true)]
    #[case("MOV", true)]
    #[case("mp4", true)]
    #[case("jpg", false)]
    #[case("", false)]
    fn test_extension_exclusion(#[case] extension: &str, #[case] expected: bool) {
        assert_eq!(ignored().is_extension_excluded("Version", "sg_uploaded_movie", extension), expected);
    }

    #[test]
    fn test_extension_exclusion_is_scoped_to_type_and_field() {
        let ignored = ignored();
        assert!(!ignored.is_extension_excluded("Version", "image", "mov"));
        assert!(!ignored.is_extension_excluded("Shot", "sg_uploaded_movie", "mov"));
    }

    #[rstest]
    #[case(1, 500)]
    #[case(2, 1_000)]
    #[case(3, 2_000)]
    #[case(10, 30_000)]
    #[case(200, 30_000)]
    fn test_backoff(#[case] attempt: u32, #[case] millis: u64) {
        let options = ArchiveOptions::default();
        assert_eq!(options.backoff(attempt), Duration::from_millis(millis));
    }

    #[rstest]
    #[case("missing", DownloadMode::Missing)]
    #[case("ALL", DownloadMode::All)]
    #[case(" none ", DownloadMode::None)]
    fn test_download_mode(#[case] input: &str, #[case] expected: DownloadMode) {
        assert_eq!(input.parse::<DownloadMode>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_download_mode() {
        let err = "sometimes".parse::<DownloadMode>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_connection_debug_hides_key() {
        let connection = Connection {
            base_url: "https://studio.example.com".to_string(),
            script_name: "archiver".to_string(),
            api_key: "hunter2".to_string(),
            timeout_secs: 60,
        };
        assert!(!format!("{connection:?}").contains("hunter2"));
    }
}
