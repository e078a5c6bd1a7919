//! Archive-relative path handling.

use crate::error::{ErrorKind, Result};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Suffix of the hidden temporary files that writes are staged in.
pub(crate) const PARTIAL_SUFFIX: &str = ".partial";

/// Whether `path` names a staged write (`.name.<pid>-<n>.partial`).
pub(crate) fn is_partial(path: &Path) -> bool {
    path.file_name().and_then(OsStr::to_str).is_some_and(|n| n.starts_with('.') && n.ends_with(PARTIAL_SUFFIX))
}

/// Normalize a path relative to the archive root, rejecting anything that
/// could not be one.
///
/// `.` components, repeated and trailing separators are dropped and `..` is
/// resolved, as long as it never climbs above the root. Absolute paths are
/// read as relative to the root. Null bytes, drive prefixes and names
/// reserved for staged writes are rejected with
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use sgarchive_storage::validate_path;
///
/// assert!(validate_path("attachments/Version/sg_uploaded_movie/12-plate.mov").is_ok());
/// assert_eq!(validate_path("records/../records/./Shot.json").unwrap(), Path::new("records/Shot.json"));
/// assert!(validate_path("records/../../etc/passwd").is_err());
/// assert!(validate_path("records/.Shot.json.41-0.partial").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let invalid = || exn::Exn::from(ErrorKind::InvalidPath(path.to_path_buf()));
    let mut normalized: Vec<&OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(name) if name.as_encoded_bytes().contains(&0) => return Err(invalid()),
            Component::Normal(name) => normalized.push(name),
            Component::ParentDir => {
                normalized.pop().ok_or_else(invalid)?;
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => return Err(invalid()),
        }
    }
    let normalized: PathBuf = normalized.into_iter().collect();
    if normalized.as_os_str().is_empty() || is_partial(&normalized) {
        return Err(invalid());
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("schema.json", "schema.json")]
    #[case("records/Shot.json", "records/Shot.json")]
    #[case("attachments/Shot/image/1-a.jpg", "attachments/Shot/image/1-a.jpg")]
    #[case("records//Shot.json", "records/Shot.json")]
    #[case("./records/./Shot.json", "records/Shot.json")]
    #[case("records/", "records")]
    #[case("attachments///", "attachments")]
    #[case("/records/Shot.json", "records/Shot.json")]
    #[case("attachments/Shot/..", "attachments")]
    #[case("records/../schema.json", "schema.json")]
    fn test_normalizes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(input).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("./.")]
    #[case("//")]
    #[case("..")]
    #[case("../schema.json")]
    #[case("records/../../schema.json")]
    #[case("records/Sh\0ot.json")]
    #[case("records/.Shot.json.1234-7.partial")]
    fn test_rejects(#[case] input: &str) {
        assert!(validate(input).is_err());
    }

    #[test]
    fn test_partial_names() {
        assert!(is_partial(Path::new("records/.Shot.json.1-0.partial")));
        // Only hidden staging files are reserved.
        assert!(!is_partial(Path::new("attachments/Shot/image/1-notes.partial")));
        assert!(!is_partial(Path::new("records/Shot.json")));
    }

    #[cfg(windows)]
    #[test]
    fn test_backslashes_are_separators() {
        assert_eq!(validate("records\\Shot.json").unwrap(), Path::new("records/Shot.json"));
    }
}
