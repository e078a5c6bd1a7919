//! Attachment references in query results point at the archived copy.

use sgarchive_model::{Attachment, DataType, Value};
use std::fmt::Write;
use std::path::Path;

/// Replace the remote location of an attachment value with a `file://` URI
/// into the archive root.
///
/// Image fields are returned as the bare URI (the remote API returns a bare
/// URL for them). Other attachments keep their descriptor with `url`
/// rewritten. Without a local copy there is nothing to point at: the URI is
/// null. Lists (files linked through multi-entity fields) are localized item
/// by item. Anything else is returned untouched.
pub fn localize(value: Value, data_type: Option<&DataType>, root: &Path) -> Value {
    let attachment = match value {
        Value::Attachment(attachment) => attachment,
        Value::List(items) => {
            return Value::List(items.into_iter().map(|item| localize(item, data_type, root)).collect());
        },
        other => return other,
    };
    let uri = attachment.local_path.as_deref().map(|local_path| file_uri(&root.join(local_path)));
    match data_type {
        Some(DataType::Image) => uri.map(Value::Text).unwrap_or(Value::Null),
        _ => Value::Attachment(Attachment { url: uri, ..attachment }),
    }
}

/// `file://` URI of an absolute path, percent-encoding everything but
/// unreserved characters and separators.
pub fn file_uri(path: &Path) -> String {
    let path = path.to_string_lossy().replace('\\', "/");
    let mut uri = String::from("file://");
    if !path.starts_with('/') {
        uri.push('/');
    }
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' | b':' => uri.push(byte as char),
            _ => {
                let _ = write!(uri, "%{byte:02X}");
            },
        }
    }
    uri
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use sgarchive_model::EntityRef;
    use std::path::PathBuf;

    fn archived(local_path: Option<&str>) -> Value {
        let mut attachment = Attachment::new("https://cdn.example.com/sh010.jpg?AWSAccessKeyId=abc");
        attachment.name = Some("sh010.jpg".to_string());
        attachment.local_path = local_path.map(PathBuf::from);
        Value::Attachment(attachment)
    }

    #[test]
    fn test_image_becomes_uri() {
        let value = archived(Some("attachments/Version/image/7-sh010.jpg"));
        let value = localize(value, Some(&DataType::Image), Path::new("/srv/archive"));
        assert_eq!(value, Value::from("file:///srv/archive/attachments/Version/image/7-sh010.jpg"));
    }

    #[test]
    fn test_image_without_local_copy_is_null() {
        assert_eq!(localize(archived(None), Some(&DataType::Image), Path::new("/srv/archive")), Value::Null);
    }

    #[test]
    fn test_url_descriptor_keeps_metadata() {
        let value = archived(Some("attachments/Version/sg_uploaded_movie/7-sh010.mov"));
        let Value::Attachment(attachment) = localize(value, Some(&DataType::Url), Path::new("/srv/archive")) else {
            panic!("descriptor was not kept");
        };
        let uri = "file:///srv/archive/attachments/Version/sg_uploaded_movie/7-sh010.mov";
        assert_eq!(attachment.url.as_deref(), Some(uri));
        assert_eq!(attachment.name.as_deref(), Some("sh010.jpg"));

        let value = localize(archived(None), Some(&DataType::Url), Path::new("/srv/archive"));
        let Value::Attachment(attachment) = value else {
            panic!("descriptor was not kept");
        };
        assert_eq!(attachment.url, None);
    }

    #[test]
    fn test_linked_files_in_lists() {
        let mut notes = Attachment::new("https://studio.example.com/file_serve/attachment/31")
            .linked_to(EntityRef::new("Attachment", 31));
        notes.local_path = Some(PathBuf::from("attachments/Attachment/this_file/31-notes.pdf"));
        let shot = Value::Entity(EntityRef::new("Shot", 3));
        let value = Value::List(vec![Value::Attachment(notes), shot.clone()]);

        let Value::List(items) = localize(value, Some(&DataType::MultiEntity), Path::new("/srv/archive")) else {
            panic!("list was not kept");
        };
        let Value::Attachment(notes) = &items[0] else { panic!("file was not kept") };
        assert_eq!(notes.url.as_deref(), Some("file:///srv/archive/attachments/Attachment/this_file/31-notes.pdf"));
        assert_eq!(notes.entity, Some(EntityRef::new("Attachment", 31)));
        assert_eq!(items[1], shot);
    }

    #[test]
    fn test_other_values_untouched() {
        assert_eq!(localize(Value::from("x"), Some(&DataType::Image), Path::new("/")), Value::from("x"));
    }

    #[rstest]
    #[case("/srv/archive/a b.mov", "file:///srv/archive/a%20b.mov")]
    #[case("/srv/archive/100%.jpg", "file:///srv/archive/100%25.jpg")]
    #[case("C:\\archive\\x.jpg", "file:///C:/archive/x.jpg")]
    fn test_file_uri(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(file_uri(Path::new(path)), expected);
    }
}
