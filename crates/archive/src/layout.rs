//! Where things live inside an archive root.
//!
//! ```text
//! schema.json                                   cached schema
//! records/<EntityType>.json                     one record store per type
//! attachments/<EntityType>/<field>/<id>-<name>  downloaded attachments
//! ```

use std::path::{Path, PathBuf};

pub const SCHEMA_FILE: &str = "schema.json";
pub const RECORDS_DIR: &str = "records";
pub const ATTACHMENTS_DIR: &str = "attachments";
const STORE_EXTENSION: &str = "json";

pub fn schema_path() -> &'static Path {
    Path::new(SCHEMA_FILE)
}

pub fn records_dir() -> &'static Path {
    Path::new(RECORDS_DIR)
}

pub fn attachments_dir() -> &'static Path {
    Path::new(ATTACHMENTS_DIR)
}

pub fn store_path(entity_type: &str) -> PathBuf {
    records_dir().join(format!("{entity_type}.{STORE_EXTENSION}"))
}

/// Entity type of a path returned by listing [`records_dir()`], if it is a
/// record store.
pub fn entity_type_of_store(path: &Path) -> Option<&str> {
    if path.parent()? != records_dir() || path.extension()? != STORE_EXTENSION {
        return None;
    }
    path.file_stem()?.to_str()
}

/// Path separators in remote file names would otherwise create directories
/// (or escape the attachment folder altogether).
pub fn sanitize_file_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

/// Deterministic location of an attachment: depends on nothing but the
/// entity type, field name, record id and file name.
pub fn attachment_path(entity_type: &str, field: &str, record_id: u64, file_name: Option<&str>) -> PathBuf {
    let file_name = match file_name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => format!("{record_id}-{}", sanitize_file_name(name)),
        None => record_id.to_string(),
    };
    attachments_dir().join(entity_type).join(field).join(file_name)
}
