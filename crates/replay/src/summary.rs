use crate::evaluate::field_value;
use sgarchive_model::{Record, SummaryField, SummaryKind, Value};
use std::cmp::Ordering;

/// Aggregate one field over the matching records.
///
/// Nulls and missing fields are skipped by every kind but `record_count`.
/// Sums stay integral until a float is involved. Averages, minimums and
/// maximums of nothing are null.
pub(crate) fn summarize(entity_type: &str, records: &[&Record], summary: &SummaryField) -> Value {
    let values = || {
        records
            .iter()
            .filter_map(|record| field_value(entity_type, record, &summary.field))
            .filter(|value| !value.is_null())
    };
    match summary.kind {
        SummaryKind::RecordCount => count(records.len()),
        SummaryKind::Count => count(values().count()),
        SummaryKind::Sum => sum(values()),
        SummaryKind::Average => {
            let numbers = values().filter_map(|value| value.as_f64()).collect::<Vec<_>>();
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        },
        SummaryKind::Minimum => extreme(values(), Ordering::Less),
        SummaryKind::Maximum => extreme(values(), Ordering::Greater),
    }
}

fn count(n: usize) -> Value {
    i64::try_from(n).map(Value::Int).unwrap_or(Value::Null)
}

fn sum(values: impl Iterator<Item = Value>) -> Value {
    let numbers = values.filter(|value| value.as_f64().is_some()).collect::<Vec<_>>();
    let integral = numbers.iter().try_fold(0_i64, |total, value| match value {
        Value::Int(i) => total.checked_add(*i),
        _ => None,
    });
    match integral {
        Some(total) => Value::Int(total),
        None => Value::Float(numbers.iter().filter_map(Value::as_f64).sum()),
    }
}

/// The value that compares `wanted` against every other one. Values that
/// can't be compared to the current pick (mixed kinds) are ignored.
fn extreme(values: impl Iterator<Item = Value>, wanted: Ordering) -> Value {
    values
        .reduce(|pick, value| if value.compare(&pick) == Some(wanted) { value } else { pick })
        .unwrap_or(Value::Null)
}
