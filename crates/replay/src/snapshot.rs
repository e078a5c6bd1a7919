use crate::error::{ErrorKind, Result};
use crate::evaluate::{Evaluator, LinearScan, field_value};
use crate::rewrite::localize;
use crate::summary::summarize;
use exn::{OptionExt, ResultExt};
use sgarchive_archive::{layout, schema};
use sgarchive_config::Config;
use sgarchive_model::{
    Direction, Entity, Filter, ID_FIELD, Order, Record, RecordStore, Schema, SummaryField, TYPE_FIELD, Value,
};
use sgarchive_storage::BackendHandle;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

/// Outcome of loading one entity type's record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Loaded, with this many records.
    Loaded(usize),
    NotArchived,
    Corrupt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub limit: Option<usize>,
}
impl FindOptions {
    pub fn limit(limit: usize) -> Self {
        Self { limit: Some(limit) }
    }
}

/// An archived snapshot, loaded into memory and queryable offline.
///
/// Tables are built completely before they are swapped in, and loading needs
/// `&mut self` while every query takes `&self`: a query never observes a
/// half-loaded table.
pub struct Snapshot {
    storage: BackendHandle,
    config: Arc<Config>,
    schema: Schema,
    /// Absolute archive root that attachment `local_path`s are relative to.
    root: PathBuf,
    tables: BTreeMap<String, RecordStore>,
    evaluator: Box<dyn Evaluator>,
}

impl Snapshot {
    /// Open the archive root behind `storage` and eagerly load the entity
    /// types listed in `html.load_entity_type`.
    ///
    /// Attachment URIs are resolved against `archive.output`.
    ///
    /// # Errors
    /// [`ErrorKind::SchemaMissing`] if nothing was ever archived there, and
    /// [`ErrorKind::CorruptSchema`] if the cached schema is unreadable. Eager
    /// loads that fail are logged and skipped.
    #[instrument(skip_all, fields(storage = storage.name()))]
    pub async fn open(storage: BackendHandle, config: Arc<Config>) -> Result<Self> {
        if !schema::exists(storage.as_ref()).await.or_raise(|| ErrorKind::Storage)? {
            exn::bail!(ErrorKind::SchemaMissing);
        }
        let schema = schema::load(storage.as_ref()).await.or_raise(|| ErrorKind::CorruptSchema)?;
        let root = std::path::absolute(&config.archive.output).unwrap_or_else(|_| config.archive.output.clone());
        let mut snapshot =
            Self { storage, config, schema, root, tables: BTreeMap::new(), evaluator: Box::new(LinearScan) };

        let eager = snapshot.config.html.load_entity_type.clone();
        for entity_type in eager {
            if let Err(e) = snapshot.load_entity_type(&entity_type).await {
                tracing::warn!(entity_type = %entity_type, error = ?e, "could not load entity type");
            }
        }
        Ok(snapshot)
    }

    /// Resolve attachment URIs against `root` instead of `archive.output`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Evaluate filters with something other than a [`LinearScan`].
    pub fn with_evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Box::new(evaluator);
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read an entity type's record store into memory, replacing any table
    /// loaded for it before. Returns the number of records.
    #[instrument(skip(self))]
    pub async fn load_entity_type(&mut self, entity_type: &str) -> Result<usize> {
        if !self.schema.contains(entity_type) {
            exn::bail!(ErrorKind::UnknownEntityType(entity_type.to_string()));
        }
        let path = layout::store_path(entity_type);
        if !self.storage.exists(&path).await.or_raise(|| ErrorKind::Storage)? {
            exn::bail!(ErrorKind::NotArchived(entity_type.to_string()));
        }
        let bytes = self.storage.read(&path).await.or_raise(|| ErrorKind::Storage)?;
        let table: RecordStore =
            serde_json::from_slice(&bytes).or_raise(|| ErrorKind::CorruptStore(entity_type.to_string()))?;
        let count = table.len();
        self.tables.insert(entity_type.to_string(), table);
        tracing::debug!(records = count, "entity type loaded");
        Ok(count)
    }

    /// Load every entity type in the schema, carrying on past types that
    /// were never archived or whose store is corrupt.
    ///
    /// # Errors
    /// Only storage failures abort the load.
    pub async fn load_entity_types(&mut self) -> Result<BTreeMap<String, LoadStatus>> {
        let entity_types = self.schema.entity_types().map(str::to_string).collect::<Vec<_>>();
        let mut statuses = BTreeMap::new();
        for entity_type in entity_types {
            let status = match self.load_entity_type(&entity_type).await {
                Ok(count) => LoadStatus::Loaded(count),
                Err(e) => match &*e {
                    ErrorKind::NotArchived(_) => LoadStatus::NotArchived,
                    ErrorKind::CorruptStore(_) => {
                        tracing::warn!(entity_type = %entity_type, error = ?e, "skipping corrupt record store");
                        LoadStatus::Corrupt
                    },
                    _ => return Err(e),
                },
            };
            statuses.insert(entity_type, status);
        }
        Ok(statuses)
    }

    /// Entity types with a record store in the archive root, loaded or not.
    pub async fn archived_entity_types(&self) -> Result<BTreeSet<String>> {
        let stores = self.storage.list(Some(layout::records_dir())).await.or_raise(|| ErrorKind::Storage)?;
        Ok(stores.iter().filter_map(|info| layout::entity_type_of_store(&info.path)).map(str::to_string).collect())
    }

    pub fn loaded_entity_types(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Field names of an entity type, as cached in the schema.
    pub fn field_names(&self, entity_type: &str) -> Result<Vec<&str>> {
        let entity =
            self.schema.entity(entity_type).ok_or_raise(|| ErrorKind::UnknownEntityType(entity_type.to_string()))?;
        Ok(entity.field_names().collect())
    }

    /// Records of `entity_type` matching every filter, sorted by `order` (by
    /// id when empty) and projected onto `fields`.
    ///
    /// Without explicit `fields` the configured `html.list_fields` for the
    /// type are returned, or every schema field if there are none. Results
    /// always carry `type` and `id`. Attachments point at their archived
    /// copy; see [`localize()`](crate::localize).
    pub fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: Option<&[String]>,
        order: &[Order],
        options: FindOptions,
    ) -> Result<Vec<Entity>> {
        let table = self.table(entity_type)?;
        let mut records = self.evaluator.select(entity_type, table, filters);
        if !order.is_empty() {
            sort(entity_type, &mut records, order);
        }
        if let Some(limit) = options.limit {
            records.truncate(limit);
        }
        let fields = self.projection(entity_type, fields);
        Ok(records.into_iter().map(|record| self.entity(entity_type, record, &fields)).collect())
    }

    /// The first record [`find()`](Self::find) would return, or `None` when
    /// nothing matches.
    pub fn find_one(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: Option<&[String]>,
        order: &[Order],
    ) -> Result<Option<Entity>> {
        let found = self.find(entity_type, filters, fields, order, FindOptions::limit(1))?;
        Ok(found.into_iter().next())
    }

    /// Aggregate fields over the records matching `filters`, keyed by field
    /// name.
    pub fn summarize(
        &self,
        entity_type: &str,
        filters: &[Filter],
        summary_fields: &[SummaryField],
    ) -> Result<BTreeMap<String, Value>> {
        let table = self.table(entity_type)?;
        let records = self.evaluator.select(entity_type, table, filters);
        Ok(summary_fields
            .iter()
            .map(|summary| (summary.field.clone(), summarize(entity_type, &records, summary)))
            .collect())
    }

    fn table(&self, entity_type: &str) -> Result<&RecordStore> {
        if !self.schema.contains(entity_type) {
            exn::bail!(ErrorKind::UnknownEntityType(entity_type.to_string()));
        }
        self.tables.get(entity_type).ok_or_raise(|| ErrorKind::NotLoaded(entity_type.to_string()))
    }

    fn projection(&self, entity_type: &str, fields: Option<&[String]>) -> Vec<String> {
        let fields = match fields.or_else(|| self.config.html.list_fields(entity_type)) {
            Some(fields) => fields.to_vec(),
            None => self
                .schema
                .entity(entity_type)
                .map(|entity| entity.field_names().map(str::to_string).collect())
                .unwrap_or_default(),
        };
        fields.into_iter().filter(|field| field != ID_FIELD && field != TYPE_FIELD).collect()
    }

    fn entity(&self, entity_type: &str, record: &Record, fields: &[String]) -> Entity {
        let fields = fields
            .iter()
            .map(|field| {
                let value = record.fields.get(field).cloned().unwrap_or_default();
                let data_type = self.schema.field(entity_type, field).map(|f| &f.data_type);
                (field.clone(), localize(value, data_type, &self.root))
            })
            .collect();
        Entity { entity_type: entity_type.to_string(), id: record.id, fields }
    }
}

/// Stable multi-key sort; ties on every key keep id order.
fn sort(entity_type: &str, records: &mut Vec<&Record>, order: &[Order]) {
    let mut keyed = records
        .drain(..)
        .map(|record| {
            let keys = order.iter().map(|o| field_value(entity_type, record, &o.field).unwrap_or_default());
            (keys.collect::<Vec<_>>(), record)
        })
        .collect::<Vec<_>>();
    keyed.sort_by(|(a, _), (b, _)| {
        order
            .iter()
            .zip(a.iter().zip(b.iter()))
            .map(|(o, (a, b))| match o.direction {
                Direction::Asc => a.sort_cmp(b),
                Direction::Desc => b.sort_cmp(a),
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    });
    records.extend(keyed.into_iter().map(|(_, record)| record));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use sgarchive_config::{ArchiveOptions, Connection, Html, Ignored};
    use sgarchive_model::{Attachment, DataType, EntitySchema, FieldSchema, Operator, SummaryKind};
    use sgarchive_storage::backend::MockBackend;

    fn config() -> Config {
        Config {
            connection: Connection {
                base_url: "https://studio.example.com".to_string(),
                script_name: "archiver".to_string(),
                api_key: "secret".to_string(),
                timeout_secs: 60,
            },
            ignored: Ignored::default(),
            filters: BTreeMap::new(),
            html: Html {
                list_fields: BTreeMap::from([("Version".to_string(), vec!["code".to_string(), "image".to_string()])]),
                load_entity_type: vec!["Project".to_string()],
            },
            archive: ArchiveOptions { output: PathBuf::from("/srv/archive"), ..Default::default() },
        }
    }

    fn schema() -> Schema {
        let mut schema = Schema::default();
        schema.entities.insert(
            "Project".to_string(),
            EntitySchema::new("Project")
                .with_field("code", FieldSchema::new("Project Name", DataType::Text))
                .with_field("name", FieldSchema::new("Name", DataType::Text))
                .with_field("sg_status", FieldSchema::new("Status", DataType::StatusList)),
        );
        schema.entities.insert(
            "Version".to_string(),
            EntitySchema::new("Version")
                .with_field("code", FieldSchema::new("Version Name", DataType::Text))
                .with_field("image", FieldSchema::new("Thumbnail", DataType::Image))
                .with_field("sg_uploaded_movie", FieldSchema::new("Movie", DataType::Url))
                .with_field("frame_count", FieldSchema::new("Frames", DataType::Number)),
        );
        for entity_type in ["Asset", "Shot"] {
            let entity = EntitySchema::new(entity_type).with_field("code", FieldSchema::new("Code", DataType::Text));
            schema.entities.insert(entity_type.to_string(), entity);
        }
        schema
    }

    fn store(records: impl IntoIterator<Item = Record>) -> Vec<u8> {
        let store = records.into_iter().map(|record| (record.id, record)).collect::<RecordStore>();
        serde_json::to_vec(&store).unwrap()
    }

    fn projects() -> Vec<u8> {
        store([
            Record::new(1).with_field("code", "alpha").with_field("name", "Alpha").with_field("sg_status", "act"),
            Record::new(2).with_field("code", "beta").with_field("name", "Beta").with_field("sg_status", "hld"),
            Record::new(3).with_field("code", "gamma").with_field("name", "Gamma").with_field("sg_status", "act"),
        ])
    }

    fn versions() -> Vec<u8> {
        let mut image = Attachment::new("https://cdn.example.com/v10.jpg");
        image.name = Some("v10.jpg".to_string());
        image.local_path = Some(PathBuf::from("attachments/Version/image/10-v10.jpg"));
        let mut movie = Attachment::new("https://studio.example.com/file_serve/attachment/99");
        movie.name = Some("v10.mov".to_string());
        store([
            Record::new(10)
                .with_field("code", "sh010_v001")
                .with_field("image", image)
                .with_field("sg_uploaded_movie", movie)
                .with_field("frame_count", Value::Int(48)),
            Record::new(11)
                .with_field("code", "sh010_v002")
                .with_field("image", Value::Null)
                .with_field("frame_count", Value::Int(48)),
            Record::new(12).with_field("code", "sh020_v001").with_field("frame_count", Value::Int(96)),
        ])
    }

    fn storage() -> MockBackend {
        MockBackend::with_files([
            ("schema.json", serde_json::to_vec(&schema()).unwrap()),
            ("records/Project.json", projects()),
            ("records/Version.json", versions()),
            ("records/Shot.json", Vec::from(*b"{ truncated")),
        ])
    }

    async fn snapshot() -> Snapshot {
        let mut snapshot = Snapshot::open(Arc::new(storage()), Arc::new(config())).await.unwrap();
        snapshot.load_entity_type("Version").await.unwrap();
        snapshot
    }

    fn strings(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|field| field.to_string()).collect()
    }

    fn ids(entities: &[Entity]) -> Vec<u64> {
        entities.iter().map(|entity| entity.id).collect()
    }

    #[tokio::test]
    async fn test_open_without_schema() {
        let err = Snapshot::open(Arc::new(MockBackend::default()), Arc::new(config())).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::SchemaMissing));
    }

    #[tokio::test]
    async fn test_open_loads_configured_types() {
        let snapshot = Snapshot::open(Arc::new(storage()), Arc::new(config())).await.unwrap();
        assert_eq!(snapshot.loaded_entity_types().collect::<Vec<_>>(), vec!["Project"]);
        assert_eq!(snapshot.root(), Path::new("/srv/archive"));
    }

    #[tokio::test]
    async fn test_find_projects_requested_fields() {
        let snapshot = snapshot().await;
        let found = snapshot
            .find(
                "Project",
                &[Filter::new("sg_status", Operator::Is, "act")],
                Some(&strings(&["id", "code"])),
                &[],
                FindOptions::default(),
            )
            .unwrap();
        assert_eq!(ids(&found), vec![1, 3]);
        assert_eq!(found[0].to_json(), serde_json::json!({"type": "Project", "id": 1, "code": "alpha"}));
        assert_eq!(found[1].fields.keys().collect::<Vec<_>>(), vec!["code"]);
    }

    #[tokio::test]
    async fn test_default_projection() {
        let snapshot = snapshot().await;
        // Configured list fields.
        let found = snapshot.find("Version", &[], None, &[], FindOptions::default()).unwrap();
        assert_eq!(found[0].fields.keys().collect::<Vec<_>>(), vec!["code", "image"]);
        // Every schema field.
        let found = snapshot.find("Project", &[], None, &[], FindOptions::default()).unwrap();
        assert_eq!(found[0].fields.keys().collect::<Vec<_>>(), vec!["code", "name", "sg_status"]);
    }

    #[tokio::test]
    async fn test_attachments_point_at_archive() {
        let snapshot = snapshot().await;
        let fields = strings(&["image", "sg_uploaded_movie"]);
        let found = snapshot.find("Version", &[], Some(&fields), &[], FindOptions::default()).unwrap();
        let thumbnail = Value::from("file:///srv/archive/attachments/Version/image/10-v10.jpg");
        assert_eq!(found[0].get("image"), Some(&thumbnail));
        let Some(Value::Attachment(movie)) = found[0].get("sg_uploaded_movie") else {
            panic!("movie is not an attachment");
        };
        assert_eq!(movie.url, None);
        assert_eq!(movie.name.as_deref(), Some("v10.mov"));
        assert_eq!(found[1].get("image"), Some(&Value::Null));
        assert_eq!(found[2].get("sg_uploaded_movie"), Some(&Value::Null));
    }

    #[rstest]
    #[case(vec![], vec![10, 11, 12])]
    #[case(vec![Order::desc("id")], vec![12, 11, 10])]
    #[case(vec![Order::desc("frame_count")], vec![12, 10, 11])]
    #[case(vec![Order::asc("frame_count"), Order::desc("code")], vec![11, 10, 12])]
    #[tokio::test]
    async fn test_find_order(#[case] order: Vec<Order>, #[case] expected: Vec<u64>) {
        let snapshot = snapshot().await;
        let found = snapshot.find("Version", &[], None, &order, FindOptions::default()).unwrap();
        assert_eq!(ids(&found), expected);
        // Same query, same answer.
        assert_eq!(snapshot.find("Version", &[], None, &order, FindOptions::default()).unwrap(), found);
    }

    #[tokio::test]
    async fn test_find_limit() {
        let snapshot = snapshot().await;
        let found = snapshot.find("Version", &[], None, &[Order::desc("id")], FindOptions::limit(2)).unwrap();
        assert_eq!(ids(&found), vec![12, 11]);
    }

    #[tokio::test]
    async fn test_find_one() {
        let snapshot = snapshot().await;
        let found = snapshot.find_one("Project", &[Filter::new("code", Operator::Is, "beta")], None, &[]).unwrap();
        assert_eq!(found.map(|entity| entity.id), Some(2));
        let found = snapshot.find_one("Project", &[Filter::new("code", Operator::Is, "delta")], None, &[]).unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_query_errors() {
        let snapshot = snapshot().await;
        let err = snapshot.find("Playlist", &[], None, &[], FindOptions::default()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownEntityType(t) if t == "Playlist"));
        let err = snapshot.find("Asset", &[], None, &[], FindOptions::default()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotLoaded(t) if t == "Asset"));
    }

    #[tokio::test]
    async fn test_load_entity_type_errors() {
        let mut snapshot = snapshot().await;
        let err = snapshot.load_entity_type("Asset").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotArchived(t) if t == "Asset"));
        let err = snapshot.load_entity_type("Shot").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::CorruptStore(t) if t == "Shot"));
        let err = snapshot.load_entity_type("Playlist").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownEntityType(_)));
    }

    #[tokio::test]
    async fn test_reload_replaces_table() {
        let mut snapshot = snapshot().await;
        assert_eq!(snapshot.load_entity_type("Project").await.unwrap(), 3);
        assert_eq!(snapshot.load_entity_type("Project").await.unwrap(), 3);
        assert_eq!(snapshot.find("Project", &[], None, &[], FindOptions::default()).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_load_entity_types_reports_per_type() {
        let mut snapshot = snapshot().await;
        let statuses = snapshot.load_entity_types().await.unwrap();
        assert_eq!(
            statuses,
            BTreeMap::from([
                ("Asset".to_string(), LoadStatus::NotArchived),
                ("Project".to_string(), LoadStatus::Loaded(3)),
                ("Shot".to_string(), LoadStatus::Corrupt),
                ("Version".to_string(), LoadStatus::Loaded(3)),
            ])
        );
        assert_eq!(snapshot.loaded_entity_types().collect::<Vec<_>>(), vec!["Project", "Version"]);
    }

    #[tokio::test]
    async fn test_archived_and_field_names() {
        let snapshot = snapshot().await;
        assert_eq!(
            snapshot.archived_entity_types().await.unwrap(),
            BTreeSet::from(["Project".to_string(), "Shot".to_string(), "Version".to_string()])
        );
        assert_eq!(snapshot.field_names("Project").unwrap(), vec!["code", "name", "sg_status"]);
        assert!(snapshot.field_names("Playlist").is_err());
    }

    #[tokio::test]
    async fn test_summarize() {
        let snapshot = snapshot().await;
        let filters = [Filter::new("code", Operator::Contains, "sh010")];
        let fields = [
            SummaryField::new("id", SummaryKind::RecordCount),
            SummaryField::new("frame_count", SummaryKind::Sum),
        ];
        let summary = snapshot.summarize("Version", &filters, &fields).unwrap();
        assert_eq!(summary["id"], Value::Int(2));
        assert_eq!(summary["frame_count"], Value::Int(96));
    }
}
