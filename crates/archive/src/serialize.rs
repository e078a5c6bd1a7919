//! Remote record → persisted [`Record`].
//!
//! Values are converted according to the field's data type rather than
//! their JSON shape, so that e.g. an image URL becomes an [`Attachment`]
//! while a text field that happens to hold a URL stays text.

use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use serde_json::{Map, Value as Json};
use sgarchive_config::Ignored;
use sgarchive_model::{
    ATTACHMENT_ENTITY_TYPE, ATTACHMENT_FILE_FIELD, Attachment, DataType, EntityRef, EntitySchema, ID_FIELD, Record,
    TYPE_FIELD, Value,
};
use sgarchive_remote::RawRecord;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Link type of files uploaded to the remote service (the only kind that
/// gets downloaded).
pub const UPLOAD_LINK_TYPE: &str = "upload";

/// Serialize one remote record of `entity_type`.
///
/// Only fields present in both the schema and the record are kept, minus
/// anything the configuration ignores. The record's `type` is implied by the
/// store it ends up in and is not kept.
///
/// # Errors
/// [`ErrorKind::InvalidRecord`] when the record has no numeric id.
pub fn serialize(raw: &RawRecord, entity_type: &str, schema: &EntitySchema, ignored: &Ignored) -> Result<Record> {
    let id = raw
        .get(ID_FIELD)
        .and_then(Json::as_u64)
        .ok_or_raise(|| ErrorKind::InvalidRecord(entity_type.to_string()))?;
    let mut record = Record::new(id);
    for (name, field) in &schema.fields {
        if name == ID_FIELD
            || name == TYPE_FIELD
            || ignored.is_data_type_ignored(&field.data_type)
            || ignored.is_field_ignored(entity_type, name)
        {
            continue;
        }
        let Some(value) = raw.get(name) else {
            continue;
        };
        record.fields.insert(name.clone(), convert(value, &field.data_type));
    }
    Ok(record)
}

fn convert(value: &Json, data_type: &DataType) -> Value {
    match (data_type, value) {
        (_, Json::Null) => Value::Null,
        (DataType::Image, Json::String(url)) => Value::Attachment(image(url)),
        (DataType::Url, Json::Object(map)) => match url(map) {
            Some(attachment) => Value::Attachment(attachment),
            None => Value::Json(value.clone()),
        },
        (DataType::Entity, Json::Object(map)) => match EntityRef::from_object(map) {
            Some(entity) => Value::Entity(entity),
            None => Value::Json(value.clone()),
        },
        (DataType::MultiEntity, Json::Array(items)) => Value::List(
            items
                .iter()
                .map(|item| match item {
                    Json::Object(map) => {
                        EntityRef::from_object(map).map(Value::Entity).unwrap_or_else(|| Value::Json(item.clone()))
                    },
                    other => Value::from(other.clone()),
                })
                .collect(),
        ),
        (DataType::DateTime, Json::String(text)) => match OffsetDateTime::parse(text, &Rfc3339) {
            Ok(datetime) => Value::DateTime(datetime),
            Err(_) => Value::Text(text.clone()),
        },
        (DataType::Serializable, _) => Value::Json(value.clone()),
        _ => Value::from(value.clone()),
    }
}

/// Image fields hold a bare URL; the file name is taken from its path.
fn image(url: &str) -> Attachment {
    let mut attachment = Attachment::new(url);
    attachment.name = attachment.file_name().map(str::to_string);
    attachment.link_type = Some(UPLOAD_LINK_TYPE.to_string());
    attachment
}

/// URL fields hold a descriptor object. Web links and local file links are
/// not downloadable and are kept verbatim.
fn url(map: &Map<String, Json>) -> Option<Attachment> {
    let text = |key: &str| map.get(key).and_then(Json::as_str).map(str::to_string);
    let link_type = text("link_type");
    if link_type.as_deref().is_some_and(|link_type| link_type != UPLOAD_LINK_TYPE) {
        return None;
    }
    Some(Attachment {
        url: Some(text("url")?),
        name: text("name"),
        content_type: text("content_type"),
        link_type,
        ..Default::default()
    })
}

/// The uploaded file held by a raw `Attachment` record, linked back to that
/// record. `None` for records without an id or whose file isn't an upload.
pub fn linked_file(raw: &RawRecord) -> Option<Attachment> {
    let id = raw.get(ID_FIELD)?.as_u64()?;
    let Json::Object(file) = raw.get(ATTACHMENT_FILE_FIELD)? else {
        return None;
    };
    let mut entity = EntityRef::new(ATTACHMENT_ENTITY_TYPE, id);
    entity.name = raw.get("name").or_else(|| file.get("name")).and_then(Json::as_str).map(str::to_string);
    Some(url(file)?.linked_to(entity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sgarchive_model::FieldSchema;
    use std::collections::BTreeMap;

    fn schema() -> EntitySchema {
        EntitySchema::new("Version")
            .with_field("code", FieldSchema::new("Version Name", DataType::Text))
            .with_field("image", FieldSchema::new("Thumbnail", DataType::Image))
            .with_field("sg_uploaded_movie", FieldSchema::new("Movie", DataType::Url))
            .with_field("sg_path_to_frames", FieldSchema::new("Frames", DataType::Url))
            .with_field("entity", FieldSchema::new("Link", DataType::Entity))
            .with_field("playlists", FieldSchema::new("Playlists", DataType::MultiEntity))
            .with_field("created_at", FieldSchema::new("Created", DataType::DateTime))
            .with_field("frame_count", FieldSchema::new("Frames", DataType::Number))
            .with_field("sg_notes", FieldSchema::new("Notes", DataType::Text))
            .with_field("cached_display", FieldSchema::new("Cached", DataType::PivotColumn))
    }

    fn raw(value: Json) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    fn version() -> RawRecord {
        raw(json!({
            "type": "Version",
            "id": 7,
            "code": "sh010_comp_v003",
            "image": "https://cdn.example.com/thumbs/sh010.jpg?AWSAccessKeyId=abc",
            "sg_uploaded_movie": {
                "url": "https://studio.example.com/file_serve/attachment/99",
                "name": "sh010_comp_v003.mov",
                "content_type": "video/quicktime",
                "link_type": "upload",
            },
            "sg_path_to_frames": { "url": "https://wiki.example.com", "name": "wiki", "link_type": "web" },
            "entity": { "type": "Shot", "id": 3, "name": "sh010" },
            "playlists": [{ "type": "Playlist", "id": 1 }, { "type": "Playlist", "id": 2, "name": "dailies" }],
            "created_at": "2024-05-01T10:30:00Z",
            "frame_count": 48,
            "sg_notes": null,
            "cached_display": "x",
            "not_in_schema": "dropped",
        }))
    }

    #[test]
    fn test_serialize_converts_by_data_type() {
        let record = serialize(&version(), "Version", &schema(), &Ignored::default()).unwrap();
        assert_eq!(record.id, 7);
        assert_eq!(record.fields["code"], Value::from("sh010_comp_v003"));
        let Value::Attachment(image) = &record.fields["image"] else { panic!("image is not an attachment") };
        assert_eq!(image.name.as_deref(), Some("sh010.jpg"));
        assert_eq!(image.link_type.as_deref(), Some("upload"));
        let Value::Attachment(movie) = &record.fields["sg_uploaded_movie"] else { panic!("movie is not an attachment") };
        assert_eq!(movie.content_type.as_deref(), Some("video/quicktime"));
        assert!(matches!(record.fields["sg_path_to_frames"], Value::Json(_)));
        assert_eq!(record.fields["entity"], Value::Entity(EntityRef::new("Shot", 3).with_name("sh010")));
        assert_eq!(
            record.fields["playlists"],
            Value::List(vec![
                Value::Entity(EntityRef::new("Playlist", 1)),
                Value::Entity(EntityRef::new("Playlist", 2).with_name("dailies")),
            ])
        );
        assert!(matches!(record.fields["created_at"], Value::DateTime(_)));
        assert_eq!(record.fields["frame_count"], Value::Int(48));
        assert_eq!(record.fields["sg_notes"], Value::Null);
        assert!(!record.fields.contains_key("not_in_schema"));
        assert!(!record.fields.contains_key("type"));
    }

    #[test]
    fn test_serialize_drops_ignored() {
        let ignored = Ignored {
            data_types: vec![DataType::PivotColumn],
            fields: BTreeMap::from([("Version".to_string(), ["sg_uploaded_movie".to_string()].into())]),
            ..Default::default()
        };
        let record = serialize(&version(), "Version", &schema(), &ignored).unwrap();
        assert!(!record.fields.contains_key("cached_display"));
        assert!(!record.fields.contains_key("sg_uploaded_movie"));
        // Ignored fields of one type don't leak into another.
        let record = serialize(&version(), "Shot", &schema(), &ignored).unwrap();
        assert!(record.fields.contains_key("sg_uploaded_movie"));
    }

    #[test]
    fn test_serialize_is_deterministic() {
        let a = serde_json::to_string(&serialize(&version(), "Version", &schema(), &Ignored::default()).unwrap()).unwrap();
        let b = serde_json::to_string(&serialize(&version(), "Version", &schema(), &Ignored::default()).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_serialize_requires_id() {
        let err = serialize(&raw(json!({ "type": "Version", "code": "x" })), "Version", &schema(), &Ignored::default())
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidRecord(t) if t == "Version"));
    }

    #[test]
    fn test_linked_file() {
        let attachment = raw(json!({
            "type": "Attachment",
            "id": 31,
            "this_file": {
                "url": "https://studio.example.com/file_serve/attachment/31",
                "name": "notes.pdf",
                "content_type": "application/pdf",
                "link_type": "upload",
            },
        }));
        let file = linked_file(&attachment).unwrap();
        assert_eq!(file.url.as_deref(), Some("https://studio.example.com/file_serve/attachment/31"));
        assert_eq!(file.name.as_deref(), Some("notes.pdf"));
        assert_eq!(file.entity, Some(EntityRef::new("Attachment", 31).with_name("notes.pdf")));

        let web_link = raw(json!({
            "type": "Attachment",
            "id": 32,
            "this_file": { "url": "https://wiki.example.com", "name": "wiki", "link_type": "web" },
        }));
        assert_eq!(linked_file(&web_link), None);
        assert_eq!(linked_file(&raw(json!({ "type": "Attachment", "id": 33, "this_file": null }))), None);
    }

    #[test]
    fn test_unparsable_datetime_stays_text() {
        let record =
            serialize(&raw(json!({ "id": 1, "created_at": "yesterday" })), "Version", &schema(), &Ignored::default())
                .unwrap();
        assert_eq!(record.fields["created_at"], Value::from("yesterday"));
    }
}
