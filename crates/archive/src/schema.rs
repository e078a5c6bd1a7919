//! Schema cache: the filtered remote schema, persisted once per archive root.

use crate::error::{ErrorKind, Result};
use crate::layout;
use exn::ResultExt;
use sgarchive_config::Ignored;
use sgarchive_model::{EntitySchema, Schema};
use sgarchive_remote::{RawEntitySchema, RawSchema, RemoteService};
use sgarchive_storage::StorageBackend;
use tracing::instrument;

/// Drop everything that must not be archived: hidden and ignored entity
/// types, fields with an ignored data type, ignored fields, and entity types
/// left without any field.
pub fn filter(entities: RawEntitySchema, fields: RawSchema, ignored: &Ignored) -> Schema {
    let mut fields = fields;
    let mut schema = Schema::default();
    for (entity_type, info) in entities {
        if !info.visible || ignored.is_entity_type_ignored(&entity_type) {
            tracing::trace!(entity_type = %entity_type, "entity type excluded");
            continue;
        }
        let Some(entity_fields) = fields.remove(&entity_type) else {
            continue;
        };
        let mut entity = EntitySchema::new(info.display_name);
        for (name, field) in entity_fields {
            if ignored.is_data_type_ignored(&field.data_type) || ignored.is_field_ignored(&entity_type, &name) {
                continue;
            }
            entity.fields.insert(name, field);
        }
        if !entity.fields.is_empty() {
            schema.entities.insert(entity_type, entity);
        }
    }
    schema
}

/// Query the remote schema, filter it and persist it as the archive root's
/// schema cache, replacing whatever was cached before.
#[instrument(skip_all)]
pub async fn refresh(remote: &dyn RemoteService, storage: &dyn StorageBackend, ignored: &Ignored) -> Result<Schema> {
    let entities = remote.schema_entity_read().await.or_raise(|| ErrorKind::Remote)?;
    let fields = remote.schema_read().await.or_raise(|| ErrorKind::Remote)?;
    let schema = filter(entities, fields, ignored);
    let bytes = serde_json::to_vec_pretty(&schema).or_raise(|| ErrorKind::CorruptSchema)?;
    storage.write(layout::schema_path(), &bytes).await.or_raise(|| ErrorKind::Storage)?;
    tracing::info!(entity_types = schema.entities.len(), "schema cached");
    Ok(schema)
}

/// Read the cached schema without contacting the remote service.
pub async fn load(storage: &dyn StorageBackend) -> Result<Schema> {
    if !storage.exists(layout::schema_path()).await.or_raise(|| ErrorKind::Storage)? {
        exn::bail!(ErrorKind::SchemaMissing);
    }
    let bytes = storage.read(layout::schema_path()).await.or_raise(|| ErrorKind::Storage)?;
    let schema = serde_json::from_slice(&bytes).or_raise(|| ErrorKind::CorruptSchema)?;
    Ok(schema)
}

/// Whether a schema has been cached in the archive root.
pub async fn exists(storage: &dyn StorageBackend) -> Result<bool> {
    storage.exists(layout::schema_path()).await.or_raise(|| ErrorKind::Storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgarchive_model::{DataType, FieldSchema};
    use sgarchive_remote::{EntityInfo, MockService};
    use sgarchive_storage::backend::MockBackend;
    use std::collections::BTreeMap;

    fn service() -> MockService {
        MockService::default()
            .with_entity_type(
                "Version",
                EntityInfo::new("Version"),
                [
                    ("code", FieldSchema::new("Version Name", DataType::Text)),
                    ("image", FieldSchema::new("Thumbnail", DataType::Image)),
                    ("sg_uploaded_movie_mp4", FieldSchema::new("Movie", DataType::Url)),
                    ("cached_display", FieldSchema::new("Cached", DataType::PivotColumn)),
                ],
            )
            .with_entity_type("Hidden", EntityInfo::new("Hidden").hidden(), [("code", FieldSchema::new("Code", DataType::Text))])
            .with_entity_type(
                "AppWelcomeUserConnection",
                EntityInfo::new("App Welcome"),
                [("code", FieldSchema::new("Code", DataType::Text))],
            )
            .with_entity_type("Empty", EntityInfo::new("Empty"), [("secret", FieldSchema::new("Secret", DataType::Password))])
    }

    fn ignored() -> Ignored {
        Ignored {
            entity_types: ["AppWelcomeUserConnection".to_string()].into(),
            data_types: vec![DataType::PivotColumn, DataType::Password],
            fields: BTreeMap::from([("Version".to_string(), ["sg_uploaded_movie_mp4".to_string()].into())]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_refresh_filters_and_persists() {
        let storage = MockBackend::default();
        let schema = refresh(&service(), &storage, &ignored()).await.unwrap();
        assert_eq!(schema.entity_types().collect::<Vec<_>>(), vec!["Version"]);
        let version = schema.entity("Version").unwrap();
        assert_eq!(version.field_names().collect::<Vec<_>>(), vec!["code", "image"]);
        assert_eq!(load(&storage).await.unwrap(), schema);
    }

    #[tokio::test]
    async fn test_refresh_replaces_wholesale() {
        let storage = MockBackend::default();
        refresh(&service(), &storage, &Ignored::default()).await.unwrap();
        let schema = refresh(&service(), &storage, &ignored()).await.unwrap();
        assert_eq!(load(&storage).await.unwrap(), schema);
        assert!(!load(&storage).await.unwrap().contains("AppWelcomeUserConnection"));
    }

    #[tokio::test]
    async fn test_load_missing() {
        let err = load(&MockBackend::default()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SchemaMissing));
    }

    #[tokio::test]
    async fn test_load_corrupt() {
        let storage = MockBackend::with_files([("schema.json", Vec::from(*b"{ not json"))]);
        let err = load(&storage).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::CorruptSchema));
    }
}
