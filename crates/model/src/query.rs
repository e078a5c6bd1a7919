use crate::Value;
use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Filter operators understood by both the remote service and the offline
/// replay layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Is,
    IsNot,
    LessThan,
    GreaterThan,
    In,
    Contains,
}
impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Is => "is",
            Self::IsNot => "is_not",
            Self::LessThan => "less_than",
            Self::GreaterThan => "greater_than",
            Self::In => "in",
            Self::Contains => "contains",
        }
    }
}
impl FromStr for Operator {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "is" => Self::Is,
            "is_not" => Self::IsNot,
            "less_than" => Self::LessThan,
            "greater_than" => Self::GreaterThan,
            "in" => Self::In,
            "contains" => Self::Contains,
            other => exn::bail!(ErrorKind::Parse { what: "operator", value: other.to_string() }),
        })
    }
}
impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// One `[field, operator, value]` condition. A list of filters is combined
/// with an implicit AND.
///
/// Serialized as the three-element array used by the remote API and the
/// configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, Operator, Json)", into = "(String, Operator, Json)")]
pub struct Filter {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}
impl Filter {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self { field: field.into(), operator, value: value.into() }
    }

    /// Evaluate this condition against a field value (`None` when the record
    /// has no such field).
    pub fn matches(&self, actual: Option<&Value>) -> bool {
        let null = Value::Null;
        let actual = actual.unwrap_or(&null);
        match self.operator {
            Operator::Is => actual.loosely_eq(&self.value),
            Operator::IsNot => !actual.loosely_eq(&self.value),
            Operator::LessThan => actual.compare(&self.value).is_some_and(|o| o.is_lt()),
            Operator::GreaterThan => actual.compare(&self.value).is_some_and(|o| o.is_gt()),
            Operator::In => match &self.value {
                Value::List(candidates) => candidates.iter().any(|candidate| actual.loosely_eq(candidate)),
                single => actual.loosely_eq(single),
            },
            Operator::Contains => actual.contains(&self.value),
        }
    }
}
impl From<(String, Operator, Json)> for Filter {
    fn from((field, operator, value): (String, Operator, Json)) -> Self {
        Self { field, operator, value: Value::from(value) }
    }
}
impl From<Filter> for (String, Operator, Json) {
    fn from(filter: Filter) -> Self {
        let value = filter.value.to_json();
        (filter.field, filter.operator, value)
    }
}
impl FromStr for Filter {
    type Err = Error;
    /// Parse the command-line form `field,operator,value`. The value is read
    /// as JSON when possible (`5`, `[1,2]`, `{"type":"Project","id":1}`) and
    /// as plain text otherwise.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ',');
        let (Some(field), Some(operator), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
            exn::bail!(ErrorKind::Parse { what: "filter", value: s.to_string() });
        };
        let value = serde_json::from_str::<Json>(value.trim()).unwrap_or_else(|_| Json::String(value.to_string()));
        Ok(Self { field: field.trim().to_string(), operator: operator.parse()?, value: Value::from(value) })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    #[serde(rename = "field_name")]
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}
impl Order {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: Direction::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: Direction::Desc }
    }
}
impl FromStr for Order {
    type Err = Error;
    /// `field`, `field:asc` or `field:desc`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, direction) = match s.split_once(':') {
            Some((field, "asc")) => (field, Direction::Asc),
            Some((field, "desc")) => (field, Direction::Desc),
            Some(_) => exn::bail!(ErrorKind::Parse { what: "sort order", value: s.to_string() }),
            None => (s, Direction::Asc),
        };
        if field.trim().is_empty() {
            exn::bail!(ErrorKind::Parse { what: "sort order", value: s.to_string() });
        }
        Ok(Self { field: field.trim().to_string(), direction })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    /// Number of matching records.
    RecordCount,
    /// Number of matching records with a non-null value.
    Count,
    Sum,
    Minimum,
    Maximum,
    Average,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryField {
    pub field: String,
    #[serde(rename = "type")]
    pub kind: SummaryKind,
}
impl SummaryField {
    pub fn new(field: impl Into<String>, kind: SummaryKind) -> Self {
        Self { field: field.into(), kind }
    }
}
