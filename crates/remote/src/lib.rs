//! Client side of the remote production-tracking service.
//!
//! The archiver only ever needs four things from the remote service: a page
//! of records, the field schema, the entity type list and the bytes behind an
//! attachment URL. [`RemoteService`] is exactly that surface, so the archiver
//! can run against [`HttpService`] in production and an in-memory mock in
//! tests.

pub mod error;
mod http;
#[cfg(feature = "mock")]
mod mock;
mod wire;

pub use crate::http::HttpService;
#[cfg(feature = "mock")]
pub use crate::mock::MockService;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use sgarchive_model::{FieldSchema, Filter};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One record exactly as the remote service returned it.
pub type RawRecord = Map<String, Json>;
/// Entity type → field name → field definition, unfiltered.
pub type RawSchema = BTreeMap<String, BTreeMap<String, FieldSchema>>;
/// Entity type → entity type metadata, unfiltered.
pub type RawEntitySchema = BTreeMap<String, EntityInfo>;

pub type RemoteHandle = Arc<dyn RemoteService + Send + Sync>;

/// Largest page the remote service hands out, whatever `limit` asks for.
pub const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub display_name: String,
    pub visible: bool,
}
impl EntityInfo {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self { display_name: display_name.into(), visible: true }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Fetch one page of records, ordered by id.
    ///
    /// `page` starts at 1. The service may return fewer than `limit` records
    /// for a page that isn't the last one (pages are capped at
    /// [`MAX_PAGE_SIZE`]); only an empty page means there is nothing left.
    async fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[String],
        limit: usize,
        page: usize,
    ) -> Result<Vec<RawRecord>>;

    /// Field definitions for every entity type.
    async fn schema_read(&self) -> Result<RawSchema>;

    /// Display name and visibility of every entity type.
    async fn schema_entity_read(&self) -> Result<RawEntitySchema>;

    /// Download the content behind an attachment URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}
