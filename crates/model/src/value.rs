use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Json};
use std::cmp::Ordering;
use std::path::PathBuf;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// A link to another record, as the remote service returns it inside entity
/// and multi-entity fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: u64) -> Self {
        Self { entity_type: entity_type.into(), id, name: None }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Recognise `{"type": "...", "id": N}` shaped objects.
    pub fn from_object(map: &Map<String, Json>) -> Option<Self> {
        let entity_type = map.get("type")?.as_str()?;
        let id = map.get("id")?.as_u64()?;
        let name = map.get("name").and_then(Json::as_str).map(str::to_string);
        Some(Self { entity_type: entity_type.to_string(), id, name })
    }

    fn key(&self) -> (&str, u64) {
        (&self.entity_type, self.id)
    }

    fn to_json(&self) -> Json {
        let mut map = Map::new();
        map.insert("type".to_string(), Json::String(self.entity_type.clone()));
        map.insert("id".to_string(), Json::from(self.id));
        if let Some(name) = &self.name {
            map.insert("name".to_string(), Json::String(name.clone()));
        }
        Json::Object(map)
    }
}

/// Describes a remotely hosted file referenced by a record field.
///
/// `url` holds the remote location while archived, and is rewritten to a
/// local `file://` reference by the replay layer. `local_path` is relative
/// to the archive root and is only present when the file exists on disk.
///
/// Files linked through entity fields rather than stored inline carry the
/// `Attachment` record they came from in `entity`, so queries can still
/// match them as entity links.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub link_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityRef>,
}
impl Attachment {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: Some(url.into()), ..Default::default() }
    }

    pub fn linked_to(mut self, entity: EntityRef) -> Self {
        self.entity = Some(entity);
        self
    }

    /// The file name to archive the attachment under: the explicit name when
    /// one was given, otherwise the last segment of the URL path.
    pub fn file_name(&self) -> Option<&str> {
        if let Some(name) = self.name.as_deref()
            && !name.trim().is_empty()
        {
            return Some(name);
        }
        let url = self.url.as_deref()?;
        let path = url.split(['?', '#']).next().unwrap_or(url);
        path.rsplit('/').next().filter(|segment| !segment.is_empty() && !segment.contains(':'))
    }

    /// Extension of [`file_name()`](Self::file_name), without the leading dot.
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name()?;
        let (stem, ext) = name.rsplit_once('.')?;
        (!stem.is_empty() && !ext.is_empty()).then_some(ext)
    }

    fn to_json(&self) -> Json {
        let mut map = Map::new();
        if let Some(entity) = &self.entity {
            map.insert("type".to_string(), Json::String(entity.entity_type.clone()));
            map.insert("id".to_string(), Json::from(entity.id));
        }
        let optional = |value: &Option<String>| value.clone().map(Json::String).unwrap_or(Json::Null);
        map.insert("url".to_string(), optional(&self.url));
        map.insert("name".to_string(), optional(&self.name));
        map.insert("content_type".to_string(), optional(&self.content_type));
        map.insert("link_type".to_string(), optional(&self.link_type));
        if let Some(local_path) = &self.local_path {
            map.insert("local_path".to_string(), Json::String(local_path.to_string_lossy().into_owned()));
        }
        Json::Object(map)
    }
}

/// A single field value.
///
/// Persisted adjacently tagged (`{"kind": "int", "value": 5}`) so that a
/// record store can be read back without consulting the schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
    Entity(EntityRef),
    Attachment(Attachment),
    List(Vec<Value>),
    /// Structured values with no dedicated variant (serializable fields,
    /// web links, ...). Kept verbatim.
    Json(Json),
}

impl From<Json> for Value {
    /// Loose conversion used for filter values and fields without a more
    /// specific data type. Objects shaped like entity links become
    /// [`Value::Entity`].
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => Self::from_number(&n),
            Json::String(s) => Self::Text(s),
            Json::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Json::Object(map) => match EntityRef::from_object(&map) {
                Some(entity) => Self::Entity(entity),
                None => Self::Json(Json::Object(map)),
            },
        }
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}
impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
impl From<EntityRef> for Value {
    fn from(entity: EntityRef) -> Self {
        Self::Entity(entity)
    }
}
impl From<Attachment> for Value {
    fn from(attachment: Attachment) -> Self {
        Self::Attachment(attachment)
    }
}

impl Value {
    pub(crate) fn from_number(n: &Number) -> Self {
        match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Self::Int(i),
            (None, Some(f)) => Self::Float(f),
            (None, None) => Self::Null,
        }
    }

    /// Render the value the way the remote API would return it.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::from(*i),
            Self::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Self::Text(s) => Json::String(s.clone()),
            Self::DateTime(dt) => dt.format(&Rfc3339).map(Json::String).unwrap_or(Json::Null),
            Self::Entity(entity) => entity.to_json(),
            Self::Attachment(attachment) => attachment.to_json(),
            Self::List(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Json(json) => json.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Ordering between values of comparable kinds; `None` when the kinds
    /// can't be compared (a text field against a number, ...).
    ///
    /// Integers and floats compare numerically, entity links (and files
    /// linked through one) compare by `(type, id)` and ignore their display
    /// name, and RFC3339 text compares against date-times.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            },
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::DateTime(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::Text(b)) => Some(a.cmp(&OffsetDateTime::parse(b, &Rfc3339).ok()?)),
            (Self::Text(a), Self::DateTime(b)) => Some(OffsetDateTime::parse(a, &Rfc3339).ok()?.cmp(b)),
            (Self::Entity(a), Self::Entity(b)) => Some(a.key().cmp(&b.key())),
            (Self::Attachment(a), Self::Entity(b)) => Some(a.entity.as_ref()?.key().cmp(&b.key())),
            (Self::Entity(a), Self::Attachment(b)) => Some(a.key().cmp(&b.entity.as_ref()?.key())),
            _ => None,
        }
    }

    /// Equality as the query language understands it (see [`compare()`](Self::compare)).
    pub fn loosely_eq(&self, other: &Value) -> bool {
        match self.compare(other) {
            Some(ordering) => ordering == Ordering::Equal,
            None => self == other,
        }
    }

    /// Substring match for text, membership for lists.
    pub fn contains(&self, needle: &Value) -> bool {
        match (self, needle) {
            (Self::Text(haystack), Self::Text(needle)) => haystack.contains(needle.as_str()),
            (Self::List(items), needle) => items.iter().any(|item| item.loosely_eq(needle)),
            (Self::Entity(entity), Self::Text(needle)) => {
                entity.name.as_deref().is_some_and(|name| name.contains(needle.as_str()))
            },
            (Self::Attachment(attachment), Self::Text(needle)) => {
                attachment.name.as_deref().is_some_and(|name| name.contains(needle.as_str()))
            },
            _ => false,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::DateTime(_) => 3,
            Self::Text(_) => 4,
            Self::Entity(_) => 5,
            Self::Attachment(_) => 6,
            Self::List(_) => 7,
            Self::Json(_) => 8,
        }
    }

    /// Total ordering used when sorting query results. Values of different
    /// kinds are grouped (nulls first), values of the same kind are ordered
    /// naturally.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        let by_rank = self.rank().cmp(&other.rank());
        if by_rank != Ordering::Equal {
            return by_rank;
        }
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                self.as_f64().unwrap_or_default().total_cmp(&other.as_f64().unwrap_or_default())
            },
            (Self::Attachment(a), Self::Attachment(b)) => a.name.cmp(&b.name),
            (Self::List(a), Self::List(b)) => {
                a.iter().zip(b.iter()).map(|(x, y)| x.sort_cmp(y)).find(|o| o.is_ne()).unwrap_or(a.len().cmp(&b.len()))
            },
            (Self::Json(a), Self::Json(b)) => a.to_string().cmp(&b.to_string()),
            _ => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }
}
