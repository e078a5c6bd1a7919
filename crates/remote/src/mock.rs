//! In-memory remote service for testing.

use crate::error::{ErrorKind, Result};
use crate::{EntityInfo, RawEntitySchema, RawRecord, RawSchema, RemoteService};
use async_trait::async_trait;
use serde_json::Value as Json;
use sgarchive_model::{FieldSchema, Filter, ID_FIELD, TYPE_FIELD, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

struct Failure {
    entity_type: String,
    page: usize,
    remaining: usize,
    kind: ErrorKind,
}

/// In-memory [`RemoteService`].
///
/// Holds tables of raw records, a schema and attachment blobs. Page fetches
/// honour filters, projection and paging the way the real service does, and
/// can be made to fail a given number of times. Every call is recorded so
/// tests can assert on what was requested.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use sgarchive_model::{DataType, FieldSchema};
/// use sgarchive_remote::{EntityInfo, MockService, RemoteService};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let service = MockService::default()
///     .with_entity_type("Shot", EntityInfo::new("Shot"), [("code", FieldSchema::new("Code", DataType::Text))])
///     .with_records("Shot", [json!({ "id": 1, "code": "sh010" })]);
/// let page = service.find("Shot", &[], &["code".to_string()], 50, 1).await?;
/// assert_eq!(page.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MockService {
    entities: RawEntitySchema,
    schema: RawSchema,
    tables: BTreeMap<String, BTreeMap<u64, RawRecord>>,
    blobs: HashMap<String, Vec<u8>>,
    failures: Mutex<Vec<Failure>>,
    finds: Mutex<Vec<(String, usize)>>,
    downloads: Mutex<Vec<String>>,
    page_cap: Option<usize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockService {
    pub fn with_entity_type<'a>(
        mut self,
        entity_type: &str,
        info: EntityInfo,
        fields: impl IntoIterator<Item = (&'a str, FieldSchema)>,
    ) -> Self {
        self.entities.insert(entity_type.to_string(), info);
        let fields = fields.into_iter().map(|(name, field)| (name.to_string(), field)).collect();
        self.schema.insert(entity_type.to_string(), fields);
        self
    }

    /// Add records to a table. Panics if a record is not an object with a
    /// numeric id: broken test data should not make it into a test.
    pub fn with_records(mut self, entity_type: &str, records: impl IntoIterator<Item = Json>) -> Self {
        let table = self.tables.entry(entity_type.to_string()).or_default();
        for record in records {
            let Json::Object(mut map) = record else {
                panic!("MockService::with_records: record is not an object");
            };
            let Some(id) = map.get(ID_FIELD).and_then(Json::as_u64) else {
                panic!("MockService::with_records: record has no numeric id");
            };
            map.insert(TYPE_FIELD.to_string(), Json::String(entity_type.to_string()));
            table.insert(id, map);
        }
        self
    }

    pub fn with_blob(mut self, url: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.blobs.insert(url.into(), data.into());
        self
    }

    /// Serve at most `cap` records per page, whatever the caller asks for.
    pub fn with_page_cap(mut self, cap: usize) -> Self {
        self.page_cap = Some(cap);
        self
    }

    /// Make the next `times` requests for `page` of `entity_type` fail.
    pub fn fail_page(&self, entity_type: &str, page: usize, times: usize, kind: ErrorKind) {
        lock(&self.failures).push(Failure { entity_type: entity_type.to_string(), page, remaining: times, kind });
    }

    /// Every `(entity_type, page)` requested so far, in order.
    pub fn find_calls(&self) -> Vec<(String, usize)> {
        lock(&self.finds).clone()
    }

    /// Every URL downloaded so far, in order.
    pub fn downloads(&self) -> Vec<String> {
        lock(&self.downloads).clone()
    }

    fn take_failure(&self, entity_type: &str, page: usize) -> Option<ErrorKind> {
        let mut failures = lock(&self.failures);
        let failure = failures.iter_mut().find(|f| f.entity_type == entity_type && f.page == page && f.remaining > 0)?;
        failure.remaining -= 1;
        Some(failure.kind.clone())
    }
}

#[async_trait]
impl RemoteService for MockService {
    async fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[String],
        limit: usize,
        page: usize,
    ) -> Result<Vec<RawRecord>> {
        lock(&self.finds).push((entity_type.to_string(), page));
        if let Some(kind) = self.take_failure(entity_type, page) {
            exn::bail!(kind);
        }
        let Some(table) = self.tables.get(entity_type) else {
            if self.entities.contains_key(entity_type) {
                return Ok(Vec::new());
            }
            exn::bail!(ErrorKind::Api { code: 103, message: format!("unknown entity type {entity_type}") });
        };
        let limit = self.page_cap.map_or(limit, |cap| limit.min(cap));
        let page = table
            .values()
            .filter(|record| {
                filters.iter().all(|filter| {
                    let actual = record.get(&filter.field).cloned().map(Value::from);
                    filter.matches(actual.as_ref())
                })
            })
            .skip(limit.saturating_mul(page.saturating_sub(1)))
            .take(limit)
            .map(|record| {
                record
                    .iter()
                    .filter(|(name, _)| *name == ID_FIELD || *name == TYPE_FIELD || fields.contains(name))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            })
            .collect();
        Ok(page)
    }

    async fn schema_read(&self) -> Result<RawSchema> {
        Ok(self.schema.clone())
    }

    async fn schema_entity_read(&self) -> Result<RawEntitySchema> {
        Ok(self.entities.clone())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        lock(&self.downloads).push(url.to_string());
        match self.blobs.get(url) {
            Some(data) => Ok(data.clone()),
            None => exn::bail!(ErrorKind::Http { status: 404, url: url.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sgarchive_model::{DataType, Operator};

    fn service() -> MockService {
        MockService::default()
            .with_entity_type(
                "Project",
                EntityInfo::new("Project"),
                [
                    ("code", FieldSchema::new("Code", DataType::Text)),
                    ("sg_status", FieldSchema::new("Status", DataType::StatusList)),
                ],
            )
            .with_records(
                "Project",
                (1..=5).map(|id| {
                    let status = if id % 2 == 0 { "act" } else { "dis" };
                    json!({ "id": id, "code": format!("p{id}"), "sg_status": status })
                }),
            )
    }

    #[tokio::test]
    async fn test_paging() {
        let service = service();
        let fields = ["code".to_string()];
        assert_eq!(service.find("Project", &[], &fields, 2, 1).await.unwrap().len(), 2);
        assert_eq!(service.find("Project", &[], &fields, 2, 3).await.unwrap().len(), 1);
        assert!(service.find("Project", &[], &fields, 2, 4).await.unwrap().is_empty());
        assert_eq!(service.find_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_page_cap() {
        let service = service().with_page_cap(2);
        let fields = ["code".to_string()];
        let first = service.find("Project", &[], &fields, 50, 1).await.unwrap();
        assert_eq!(first.len(), 2);
        // Paging uses the capped size, so page 3 holds the fifth record.
        let last = service.find("Project", &[], &fields, 50, 3).await.unwrap();
        assert_eq!(last[0].get("id"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn test_filters_and_projection() {
        let service = service();
        let filters = [Filter::new("sg_status", Operator::Is, "act")];
        let page = service.find("Project", &filters, &["code".to_string()], 50, 1).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0], json!({ "id": 2, "type": "Project", "code": "p2" }).as_object().unwrap().clone());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let service = service();
        service.fail_page("Project", 1, 2, ErrorKind::Transport("reset".to_string()));
        assert!(service.find("Project", &[], &[], 50, 1).await.is_err());
        assert!(service.find("Project", &[], &[], 50, 1).await.is_err());
        assert!(service.find("Project", &[], &[], 50, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_download() {
        let service = MockService::default().with_blob("https://cdn/a.jpg", *b"jpeg");
        assert_eq!(service.download("https://cdn/a.jpg").await.unwrap(), b"jpeg");
        let err = service.download("https://cdn/missing.jpg").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Http { status: 404, .. }));
        assert_eq!(service.downloads().len(), 2);
    }
}
