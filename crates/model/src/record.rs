use crate::{ID_FIELD, TYPE_FIELD, Value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;

/// A serialized record, as persisted in a record store.
///
/// `fields` never contains `id` or `type`: the id is stored alongside and the
/// type is implied by the store the record lives in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}
impl Record {
    pub fn new(id: u64) -> Self {
        Self { id, fields: BTreeMap::new() }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Field lookup that also understands the implicit `id` field.
    pub fn get(&self, field: &str) -> Option<Value> {
        match field {
            ID_FIELD => i64::try_from(self.id).ok().map(Value::Int),
            _ => self.fields.get(field).cloned(),
        }
    }
}

/// On-disk shape of one entity type's archive: id → record, ordered by id so
/// that rewriting an unchanged store yields identical bytes.
pub type RecordStore = BTreeMap<u64, Record>;

/// A query result: a record together with the type it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub entity_type: String,
    pub id: u64,
    pub fields: BTreeMap<String, Value>,
}
impl Entity {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Render the result the way the remote API returns entities: `type` and
    /// `id` alongside every projected field.
    pub fn to_json(&self) -> Json {
        let mut map = Map::new();
        map.insert(TYPE_FIELD.to_string(), Json::String(self.entity_type.clone()));
        map.insert(ID_FIELD.to_string(), Json::from(self.id));
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        Json::Object(map)
    }
}
