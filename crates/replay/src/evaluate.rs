//! Filter evaluation against an in-memory table.

use sgarchive_model::{Filter, ID_FIELD, Record, RecordStore, TYPE_FIELD, Value};

/// Selects the records of a table that match every filter.
///
/// Implementations must return matches in ascending id order, so that
/// unordered queries are stable across calls and evaluators.
pub trait Evaluator: Send + Sync {
    fn select<'a>(&self, entity_type: &str, table: &'a RecordStore, filters: &[Filter]) -> Vec<&'a Record>;
}

/// Checks every record against every filter. No index, no setup cost.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearScan;

impl Evaluator for LinearScan {
    fn select<'a>(&self, entity_type: &str, table: &'a RecordStore, filters: &[Filter]) -> Vec<&'a Record> {
        table
            .values()
            .filter(|record| {
                filters.iter().all(|filter| filter.matches(field_value(entity_type, record, &filter.field).as_ref()))
            })
            .collect()
    }
}

/// Value of `field` on a record of `entity_type`, including the implicit
/// `type` and `id` fields.
pub fn field_value(entity_type: &str, record: &Record, field: &str) -> Option<Value> {
    match field {
        TYPE_FIELD => Some(Value::from(entity_type)),
        ID_FIELD => record.get(ID_FIELD),
        _ => record.fields.get(field).cloned(),
    }
}
