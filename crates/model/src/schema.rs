use crate::ATTACHMENT_ENTITY_TYPE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Data types reported by the remote schema.
///
/// Unknown type names are kept verbatim in [`DataType::Other`] so a newer
/// server never breaks schema caching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Text,
    Number,
    Float,
    Checkbox,
    Date,
    DateTime,
    Entity,
    MultiEntity,
    Image,
    Url,
    StatusList,
    List,
    TagList,
    Duration,
    Percent,
    Currency,
    Timecode,
    Color,
    Uuid,
    Serializable,
    PivotColumn,
    Password,
    Summary,
    Calculated,
    Footage,
    EntityType,
    #[serde(untagged)]
    Other(String),
}
impl DataType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Float => "float",
            Self::Checkbox => "checkbox",
            Self::Date => "date",
            Self::DateTime => "date_time",
            Self::Entity => "entity",
            Self::MultiEntity => "multi_entity",
            Self::Image => "image",
            Self::Url => "url",
            Self::StatusList => "status_list",
            Self::List => "list",
            Self::TagList => "tag_list",
            Self::Duration => "duration",
            Self::Percent => "percent",
            Self::Currency => "currency",
            Self::Timecode => "timecode",
            Self::Color => "color",
            Self::Uuid => "uuid",
            Self::Serializable => "serializable",
            Self::PivotColumn => "pivot_column",
            Self::Password => "password",
            Self::Summary => "summary",
            Self::Calculated => "calculated",
            Self::Footage => "footage",
            Self::EntityType => "entity_type",
            Self::Other(other) => other,
        }
    }

    /// Fields of this type hold files that get downloaded during archival.
    pub fn is_attachment_like(&self) -> bool {
        matches!(self, Self::Image | Self::Url)
    }
}
impl From<&str> for DataType {
    fn from(s: &str) -> Self {
        // Round-trip through serde so the name table lives in one place.
        serde_json::from_value(serde_json::Value::String(s.to_string())).unwrap_or_else(|_| Self::Other(s.to_string()))
    }
}
impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Human readable field name.
    pub display_name: String,
    pub data_type: DataType,
    /// Entity types an entity/multi-entity field may link to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub valid_types: Vec<String>,
}
impl FieldSchema {
    pub fn new(display_name: impl Into<String>, data_type: DataType) -> Self {
        Self { display_name: display_name.into(), data_type, valid_types: Vec::new() }
    }

    pub fn with_valid_types(mut self, valid_types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.valid_types = valid_types.into_iter().map(Into::into).collect();
        self
    }

    /// Entity links in this field may point at `Attachment` records, whose
    /// files get downloaded during archival.
    pub fn links_attachments(&self) -> bool {
        matches!(self.data_type, DataType::Entity | DataType::MultiEntity)
            && self.valid_types.iter().any(|t| t == ATTACHMENT_ENTITY_TYPE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub display_name: String,
    #[serde(default = "visible_by_default")]
    pub visible: bool,
    /// Field definitions in schema order (lexicographic by field name).
    pub fields: BTreeMap<String, FieldSchema>,
}
impl EntitySchema {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self { display_name: display_name.into(), visible: true, fields: BTreeMap::new() }
    }

    pub fn with_field(mut self, name: impl Into<String>, field: FieldSchema) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

fn visible_by_default() -> bool {
    true
}

/// The cached remote schema: every archivable entity type and its fields,
/// after configured exclusions have been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub entities: BTreeMap<String, EntitySchema>,
}
impl Schema {
    pub fn entity(&self, entity_type: &str) -> Option<&EntitySchema> {
        self.entities.get(entity_type)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.entities.contains_key(entity_type)
    }

    pub fn field(&self, entity_type: &str, field: &str) -> Option<&FieldSchema> {
        self.entity(entity_type)?.field(field)
    }
}
