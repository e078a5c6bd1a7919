use crate::error::{ErrorKind, Result};
use crate::fetch::{AttachmentCounts, FetchResult, fetch};
use crate::layout;
use crate::serialize::{linked_file, serialize};
use async_stream::stream;
use exn::ResultExt;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use serde_json::Value as Json;
use sgarchive_config::Config;
use sgarchive_model::{
    ATTACHMENT_ENTITY_TYPE, ATTACHMENT_FILE_FIELD, Attachment, EntitySchema, Filter, ID_FIELD, Operator, Record,
    RecordStore, Schema, Value,
};
use sgarchive_remote::{MAX_PAGE_SIZE, RawRecord, RemoteHandle};
use sgarchive_storage::BackendHandle;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Selects every entity type in the schema.
pub const SELECT_ALL: &str = "all";
/// Selects every entity type in the schema that has no record store yet.
pub const SELECT_MISSING: &str = "missing";

/// How archiving one entity type ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOutcome {
    /// Paged to the end.
    Completed,
    /// Stopped at the page limit while there were more records.
    Truncated,
    /// Cancelled between pages. Committed pages are kept.
    Interrupted,
    /// A page could not be fetched or committed, or the existing store is
    /// unreadable.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSummary {
    pub entity_type: String,
    pub outcome: TypeOutcome,
    /// Pages committed to the record store.
    pub pages: usize,
    /// Records written to the record store.
    pub records: usize,
    /// Records rejected by the serializer.
    pub rejected: usize,
    pub attachments: AttachmentCounts,
    pub error: Option<String>,
}
impl TypeSummary {
    fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            outcome: TypeOutcome::Completed,
            pages: 0,
            records: 0,
            rejected: 0,
            attachments: AttachmentCounts::default(),
            error: None,
        }
    }

    fn fail(mut self, error: &exn::Exn<ErrorKind>) -> Self {
        tracing::error!(entity_type = %self.entity_type, error = ?error, "archiving failed");
        self.outcome = TypeOutcome::Failed;
        self.error = Some(error.to_string());
        self
    }
}

/// Progress events emitted by [`Archiver::archive_stream()`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) exactly once.
/// 2. Per entity type, in the requested order: [`TypeStarted`](Self::TypeStarted),
///    then any number of [`Retrying`](Self::Retrying) and
///    [`PageCommitted`](Self::PageCommitted), then [`TypeFinished`](Self::TypeFinished).
/// 3. [`Complete`](Self::Complete) exactly once.
///
/// Failures never end the stream early; they end up in the type's summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEvent {
    Started { entity_types: usize },
    TypeStarted { entity_type: String },
    /// A page fetch failed with a retryable error and will be attempted again
    /// after `delay`.
    Retrying { entity_type: String, page: usize, attempt: u32, delay: Duration },
    PageCommitted { entity_type: String, page: usize, records: usize, attachments: AttachmentCounts },
    TypeFinished(TypeSummary),
    Complete,
}

/// Classification of a whole run, used for the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Some entity types were truncated or interrupted, none failed.
    Partial,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub types: Vec<TypeSummary>,
}
impl ArchiveSummary {
    /// Fold an event into the summary.
    pub fn record(&mut self, event: &ArchiveEvent) {
        if let ArchiveEvent::TypeFinished(summary) = event {
            self.types.push(summary.clone());
        }
    }

    pub fn records(&self) -> usize {
        self.types.iter().map(|t| t.records).sum()
    }

    pub fn attachments(&self) -> AttachmentCounts {
        let mut total = AttachmentCounts::default();
        for summary in &self.types {
            total += summary.attachments;
        }
        total
    }

    pub fn status(&self) -> RunStatus {
        let outcomes: Vec<_> = self.types.iter().map(|t| t.outcome).collect();
        if outcomes.contains(&TypeOutcome::Failed) {
            RunStatus::Failed
        } else if outcomes.iter().any(|o| matches!(o, TypeOutcome::Truncated | TypeOutcome::Interrupted)) {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        }
    }
}

/// Pages through the remote service and mirrors every requested entity type
/// into the archive root.
///
/// Entity types are archived one after another. Within a page, links to
/// `Attachment` records are resolved to their files, attachments are
/// downloaded concurrently (up to `archive.concurrency`), and the page is
/// committed to the type's record store before the next page is requested.
/// A run that stops early, for whatever reason, leaves a valid archive root
/// behind that the next run merges into.
pub struct Archiver {
    remote: RemoteHandle,
    storage: BackendHandle,
    config: Arc<Config>,
    cancel: CancellationToken,
}
impl Archiver {
    pub fn new(remote: RemoteHandle, storage: BackendHandle, config: Arc<Config>) -> Self {
        Self { remote, storage, config, cancel: CancellationToken::new() }
    }

    /// Use `cancel` to stop the archiver between pages.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Remove everything the archiver writes from the archive root.
    #[instrument(skip(self))]
    pub async fn clean(&self) -> Result<()> {
        if self.storage.exists(layout::schema_path()).await.or_raise(|| ErrorKind::Storage)? {
            self.storage.delete(layout::schema_path()).await.or_raise(|| ErrorKind::Storage)?;
        }
        self.storage.delete_all(layout::records_dir()).await.or_raise(|| ErrorKind::Storage)?;
        self.storage.delete_all(layout::attachments_dir()).await.or_raise(|| ErrorKind::Storage)?;
        tracing::info!(backend = self.storage.name(), "archive root cleaned");
        Ok(())
    }

    /// Entity types that already have a record store.
    pub async fn archived_entity_types(&self) -> Result<BTreeSet<String>> {
        let stores = self.storage.list(Some(layout::records_dir())).await.or_raise(|| ErrorKind::Storage)?;
        Ok(stores.iter().filter_map(|info| layout::entity_type_of_store(&info.path)).map(str::to_string).collect())
    }

    /// Expand a selection of entity type names and the keywords
    /// [`SELECT_ALL`] and [`SELECT_MISSING`] into entity types, in schema
    /// order for keywords and in the given order otherwise, without
    /// duplicates. An empty selection means everything.
    ///
    /// # Errors
    /// [`ErrorKind::UnknownEntityType`] for names not in the schema, which
    /// includes ignored and hidden entity types.
    pub async fn resolve_entity_types(&self, schema: &Schema, selection: &[String]) -> Result<Vec<String>> {
        let mut resolved: Vec<String> = Vec::new();
        let mut push = |entity_type: &str| {
            if !resolved.iter().any(|t| t == entity_type) {
                resolved.push(entity_type.to_string());
            }
        };
        let all = [SELECT_ALL.to_string()];
        let selection = if selection.is_empty() { &all[..] } else { selection };
        for selected in selection {
            match selected.as_str() {
                SELECT_ALL => schema.entity_types().for_each(&mut push),
                SELECT_MISSING => {
                    let archived = self.archived_entity_types().await?;
                    schema.entity_types().filter(|t| !archived.contains(*t)).for_each(&mut push);
                },
                name if schema.contains(name) => push(name),
                name => exn::bail!(ErrorKind::UnknownEntityType(name.to_string())),
            }
        }
        Ok(resolved)
    }

    /// Archive `entity_types` and return the folded summary.
    pub async fn archive(
        &self,
        schema: &Schema,
        entity_types: &[String],
        limit: usize,
        max_pages: Option<usize>,
    ) -> ArchiveSummary {
        self.archive_stream(schema, entity_types, limit, max_pages)
            .fold(ArchiveSummary::default(), |mut summary, event| async move {
                summary.record(&event);
                summary
            })
            .await
    }

    /// Archive `entity_types`, `limit` records per page, stopping each type
    /// after `max_pages` pages if given.
    ///
    /// `limit` is clamped to `1..=`[`MAX_PAGE_SIZE`]. A type is complete once
    /// the remote service returns an empty page; page length says nothing,
    /// since the service may cap it. When `max_pages` is reached, one more
    /// record is looked up to tell a finished type from a truncated one.
    ///
    /// The stream yields events in the order documented on [`ArchiveEvent`].
    pub fn archive_stream<'a>(
        &'a self,
        schema: &'a Schema,
        entity_types: &'a [String],
        limit: usize,
        max_pages: Option<usize>,
    ) -> impl Stream<Item = ArchiveEvent> + 'a {
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            yield ArchiveEvent::Started { entity_types: entity_types.len() };
            for entity_type in entity_types {
                for await event in self.archive_type(schema, entity_type, limit.clamp(1, MAX_PAGE_SIZE), max_pages) {
                    yield event;
                }
            }
            yield ArchiveEvent::Complete;
        })
    }

    fn archive_type<'a>(
        &'a self,
        schema: &'a Schema,
        entity_type: &'a str,
        limit: usize,
        max_pages: Option<usize>,
    ) -> impl Stream<Item = ArchiveEvent> + 'a {
        stream!({
            yield ArchiveEvent::TypeStarted { entity_type: entity_type.to_string() };
            let mut summary = TypeSummary::new(entity_type);

            if schema.entity(entity_type).is_none() {
                let err = exn::Exn::from(ErrorKind::UnknownEntityType(entity_type.to_string()));
                yield ArchiveEvent::TypeFinished(summary.fail(&err));
                return;
            }
            let fields = self.fields(schema, entity_type);
            let (mut store, mut persisted) = match self.load_store(entity_type).await {
                Ok(Some(store)) => (store, true),
                Ok(None) => (RecordStore::new(), false),
                Err(e) => {
                    yield ArchiveEvent::TypeFinished(summary.fail(&e));
                    return;
                },
            };
            tracing::info!(entity_type, existing = store.len(), "archiving");

            let mut page = 1;
            let mut received = 0;
            loop {
                if self.cancel.is_cancelled() {
                    tracing::warn!(entity_type, page, "cancelled");
                    summary.outcome = TypeOutcome::Interrupted;
                    break;
                }
                if max_pages.is_some_and(|max| page > max) {
                    summary.outcome = self.outcome_at_page_limit(entity_type, received).await;
                    break;
                }

                let mut attempt = 0;
                let fetched = loop {
                    let filters = self.config.filters_for(entity_type);
                    match self.remote.find(entity_type, filters, &fields, limit, page).await {
                        Ok(raw) => break Ok(raw),
                        Err(e) if e.is_retryable() && attempt < self.config.archive.retries => {
                            attempt += 1;
                            let delay = self.config.archive.backoff(attempt);
                            tracing::warn!(entity_type, page, attempt, ?delay, error = ?e, "page fetch failed");
                            yield ArchiveEvent::Retrying { entity_type: entity_type.to_string(), page, attempt, delay };
                            tokio::select! {
                                () = tokio::time::sleep(delay) => {},
                                () = self.cancel.cancelled() => break Err(exn::Exn::from(ErrorKind::Cancelled)),
                            }
                        },
                        Err(e) => break Err(e).or_raise(|| ErrorKind::Remote),
                    }
                };
                let raw = match fetched {
                    Ok(raw) => raw,
                    Err(e) if matches!(&*e, ErrorKind::Cancelled) => {
                        summary.outcome = TypeOutcome::Interrupted;
                        break;
                    },
                    Err(e) => {
                        summary = summary.fail(&e);
                        break;
                    },
                };
                if raw.is_empty() {
                    // Nothing archived yet still leaves an (empty) store behind.
                    if !persisted && let Err(e) = self.commit(entity_type, page, &store).await {
                        summary = summary.fail(&e);
                        break;
                    }
                    summary.outcome = TypeOutcome::Completed;
                    break;
                }
                received += raw.len();

                let (mut records, rejected) = self.serialize_page(schema, entity_type, &raw);
                summary.rejected += rejected;
                let mut attachments = self.link_attachments(schema, entity_type, &mut records).await;
                attachments += self.fetch_attachments(entity_type, page, &mut records).await;
                summary.attachments += attachments;

                let written = records.len();
                for record in records {
                    store.insert(record.id, record);
                }
                if let Err(e) = self.commit(entity_type, page, &store).await {
                    summary = summary.fail(&e);
                    break;
                }
                persisted = true;
                summary.pages += 1;
                summary.records += written;
                yield ArchiveEvent::PageCommitted {
                    entity_type: entity_type.to_string(),
                    page,
                    records: written,
                    attachments,
                };
                page += 1;
            }

            tracing::info!(
                entity_type,
                outcome = ?summary.outcome,
                pages = summary.pages,
                records = summary.records,
                downloaded = summary.attachments.downloaded,
                failed = summary.attachments.failed,
                "finished"
            );
            yield ArchiveEvent::TypeFinished(summary);
        })
    }

    /// Whether anything is left after the first `received` records, looked up
    /// one record at a time.
    async fn outcome_at_page_limit(&self, entity_type: &str, received: usize) -> TypeOutcome {
        let filters = self.config.filters_for(entity_type);
        match self.remote.find(entity_type, filters, &[], 1, received + 1).await {
            Ok(next) if next.is_empty() => TypeOutcome::Completed,
            Ok(_) => TypeOutcome::Truncated,
            Err(e) => {
                tracing::warn!(entity_type, error = ?e, "could not check for more records");
                TypeOutcome::Truncated
            },
        }
    }

    /// Schema fields of `entity_type` that the configuration doesn't ignore.
    fn fields(&self, schema: &Schema, entity_type: &str) -> Vec<String> {
        let ignored = &self.config.ignored;
        schema
            .entity(entity_type)
            .map(|entity| {
                entity
                    .fields
                    .iter()
                    .filter(|(name, field)| {
                        !ignored.is_data_type_ignored(&field.data_type) && !ignored.is_field_ignored(entity_type, name)
                    })
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Existing record store for `entity_type`, `None` if there is none yet.
    async fn load_store(&self, entity_type: &str) -> Result<Option<RecordStore>> {
        let path = layout::store_path(entity_type);
        if !self.storage.exists(&path).await.or_raise(|| ErrorKind::Storage)? {
            return Ok(None);
        }
        let bytes = self.storage.read(&path).await.or_raise(|| ErrorKind::Storage)?;
        let store = serde_json::from_slice(&bytes).or_raise(|| ErrorKind::CorruptStore(entity_type.to_string()))?;
        Ok(Some(store))
    }

    fn serialize_page(&self, schema: &Schema, entity_type: &str, raw: &[RawRecord]) -> (Vec<Record>, usize) {
        let Some(entity) = schema.entity(entity_type) else {
            return (Vec::new(), raw.len());
        };
        let mut rejected = 0;
        let records = raw
            .iter()
            .filter_map(|raw| match serialize(raw, entity_type, entity, &self.config.ignored) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(entity_type, error = ?e, "record rejected");
                    rejected += 1;
                    None
                },
            })
            .collect();
        (records, rejected)
    }

    /// Replace links to `Attachment` records with the files those records
    /// hold, so they are downloaded along with the page. Links that can't be
    /// resolved stay plain entity links; a failed lookup counts every link
    /// it covered as failed.
    #[instrument(level = "debug", skip(self, schema, records), fields(records = records.len()))]
    async fn link_attachments(&self, schema: &Schema, entity_type: &str, records: &mut [Record]) -> AttachmentCounts {
        let mut counts = AttachmentCounts::default();
        let Some(fields) = schema.entity(entity_type).map(linking_fields) else {
            return counts;
        };
        let ids: BTreeSet<u64> = records
            .iter()
            .flat_map(|record| fields.iter().filter_map(move |field| record.fields.get(*field)))
            .flat_map(links)
            .filter_map(attachment_link)
            .collect();
        if ids.is_empty() {
            return counts;
        }

        let ids: Vec<u64> = ids.into_iter().collect();
        let file_field = [ATTACHMENT_FILE_FIELD.to_string()];
        let mut files = BTreeMap::new();
        for chunk in ids.chunks(MAX_PAGE_SIZE) {
            let wanted = Value::List(chunk.iter().map(|id| Value::from(Json::from(*id))).collect());
            let filters = [Filter::new(ID_FIELD, Operator::In, wanted)];
            match self.remote.find(ATTACHMENT_ENTITY_TYPE, &filters, &file_field, chunk.len(), 1).await {
                Ok(raw) => {
                    for file in raw.iter().filter_map(linked_file) {
                        if let Some(linked) = &file.entity {
                            files.insert(linked.id, file.clone());
                        }
                    }
                },
                Err(e) => {
                    tracing::warn!(entity_type, links = chunk.len(), error = ?e, "could not resolve attachment links");
                    counts.failed += chunk.len();
                },
            }
        }
        tracing::debug!(links = ids.len(), resolved = files.len(), "attachment links resolved");

        for record in records.iter_mut() {
            for field in &fields {
                let Some(value) = record.fields.get_mut(*field) else {
                    continue;
                };
                for item in links_mut(value) {
                    if let Some(file) = attachment_link(item).and_then(|id| files.get(&id)) {
                        *item = Value::Attachment(file.clone());
                    }
                }
            }
        }
        counts
    }

    /// Download every attachment on the page and record the outcome in the
    /// descriptors. A file linked from several places on the page is fetched
    /// once.
    #[instrument(level = "debug", skip(self, records), fields(records = records.len()))]
    async fn fetch_attachments(&self, entity_type: &str, page: usize, records: &mut [Record]) -> AttachmentCounts {
        let mut jobs: Vec<FetchJob> = Vec::new();
        let mut linked: BTreeMap<u64, usize> = BTreeMap::new();
        for (index, record) in records.iter().enumerate() {
            for (field, value) in &record.fields {
                for (item, value) in links(value).iter().enumerate() {
                    let Value::Attachment(attachment) = value else {
                        continue;
                    };
                    let slot = (index, field.clone(), item);
                    if let Some(entity) = &attachment.entity {
                        if let Some(&job) = linked.get(&entity.id) {
                            jobs[job].slots.push(slot);
                            continue;
                        }
                        linked.insert(entity.id, jobs.len());
                    }
                    jobs.push(FetchJob {
                        record_id: record.id,
                        field: field.clone(),
                        attachment: attachment.clone(),
                        slots: vec![slot],
                    });
                }
            }
        }

        let storage = self.storage.as_ref();
        let remote = self.remote.as_ref();
        let config = self.config.as_ref();
        let mut futures: VecDeque<_> = jobs
            .into_iter()
            .map(|job| async move {
                let FetchJob { record_id, field, attachment, slots } = job;
                (slots, fetch(&attachment, entity_type, &field, record_id, storage, remote, config).await)
            })
            .collect();
        let mut processing = FuturesUnordered::new();
        processing.extend(futures.drain(..config.archive.concurrency.max(1).min(futures.len())));

        let mut counts = AttachmentCounts::default();
        while let Some((slots, FetchResult { status, local_path })) = processing.next().await {
            counts.record(status);
            for (index, field, item) in slots {
                let value = records.get_mut(index).and_then(|r| r.fields.get_mut(&field));
                if let Some(Value::Attachment(attachment)) = value.and_then(|value| links_mut(value).get_mut(item)) {
                    attachment.local_path = local_path.clone();
                }
            }
            // Pop-n-push, but FIFO instead of LIFO.
            if let Some(next) = futures.pop_front() {
                processing.push(next);
            }
        }
        counts
    }

    #[instrument(level = "debug", skip(self, store), fields(records = store.len()))]
    async fn commit(&self, entity_type: &str, page: usize, store: &RecordStore) -> Result<()> {
        let path = layout::store_path(entity_type);
        let bytes = serde_json::to_vec_pretty(store).or_raise(|| ErrorKind::CorruptStore(entity_type.to_string()))?;
        self.storage.write(&path, &bytes).await.or_raise(|| ErrorKind::Storage)?;
        if self.config.archive.strict {
            let stored = self.storage.read(&path).await.or_raise(|| ErrorKind::Storage)?;
            if stored != bytes {
                exn::bail!(ErrorKind::StrictCheck(entity_type.to_string()));
            }
            tracing::trace!(entity_type, "record store verified");
        }
        Ok(())
    }
}

/// One file to fetch, and every descriptor on the page that points at it as
/// `(record index, field, position in the field)`.
struct FetchJob {
    record_id: u64,
    field: String,
    attachment: Attachment,
    slots: Vec<(usize, String, usize)>,
}

/// Fields of `entity` that may link to `Attachment` records.
fn linking_fields(entity: &EntitySchema) -> Vec<&str> {
    entity.fields.iter().filter(|(_, field)| field.links_attachments()).map(|(name, _)| name.as_str()).collect()
}

/// The items of a multi-valued field, or the value itself.
fn links(value: &Value) -> &[Value] {
    match value {
        Value::List(items) => items,
        other => std::slice::from_ref(other),
    }
}

fn links_mut(value: &mut Value) -> &mut [Value] {
    match value {
        Value::List(items) => items,
        other => std::slice::from_mut(other),
    }
}

/// Id of the `Attachment` record `value` links to, if it is such a link.
fn attachment_link(value: &Value) -> Option<u64> {
    match value {
        Value::Entity(link) if link.entity_type == ATTACHMENT_ENTITY_TYPE => Some(link.id),
        _ => None,
    }
}
