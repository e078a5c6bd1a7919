//! JSON-RPC payloads understood by the remote service.
//!
//! Requests are `{"method_name": ..., "params": [auth, payload]}`; responses
//! carry either `results` or an `exception` flag with a message. Schema
//! responses wrap every property as `{"value": ...}`.

use crate::error::{ErrorKind, Result};
use crate::{EntityInfo, RawEntitySchema, RawRecord, RawSchema};
use serde_json::{Map, Value as Json, json};
use sgarchive_config::Connection;
use sgarchive_model::{FieldSchema, Filter, ID_FIELD, Operator, Value};
use std::collections::BTreeMap;

pub(crate) fn auth(connection: &Connection) -> Json {
    json!({
        "script_name": connection.script_name,
        "script_key": connection.api_key,
    })
}

pub(crate) fn request(method: &str, auth: &Json, payload: Json) -> Json {
    json!({ "method_name": method, "params": [auth, payload] })
}

fn condition(filter: &Filter) -> Json {
    let values = match (&filter.value, filter.operator) {
        (Value::List(items), Operator::In) => items.iter().map(Value::to_json).collect(),
        (value, _) => vec![value.to_json()],
    };
    json!({ "path": filter.field, "relation": filter.operator.as_str(), "values": values })
}

/// Payload for one page of a `read` call, sorted by id so that pages are
/// stable between requests.
pub(crate) fn read_payload(
    entity_type: &str,
    filters: &[Filter],
    fields: &[String],
    limit: usize,
    page: usize,
) -> Json {
    json!({
        "type": entity_type,
        "return_fields": fields,
        "filters": {
            "logical_operator": "and",
            "conditions": filters.iter().map(condition).collect::<Vec<_>>(),
        },
        "sorts": [{ "field_name": ID_FIELD, "direction": "asc" }],
        "paging": { "current_page": page, "entities_per_page": limit },
        "return_only": "active",
    })
}

/// Pull `results` out of a response body, turning reported exceptions into
/// [`ErrorKind::Api`].
pub(crate) fn results(mut body: Json) -> Result<Json> {
    if body.get("exception").and_then(Json::as_bool).unwrap_or(false) {
        let message = body.get("message").and_then(Json::as_str).unwrap_or("unknown error").to_string();
        let code = body.get("error_code").and_then(Json::as_i64).unwrap_or_default();
        exn::bail!(ErrorKind::Api { code, message });
    }
    match body.get_mut("results") {
        Some(results) => Ok(results.take()),
        None => exn::bail!(ErrorKind::Protocol("response has no results".to_string())),
    }
}

pub(crate) fn entities(mut results: Json) -> Result<Vec<RawRecord>> {
    let Some(Json::Array(items)) = results.get_mut("entities").map(Json::take) else {
        exn::bail!(ErrorKind::Protocol("read results have no entity list".to_string()));
    };
    items
        .into_iter()
        .map(|item| match item {
            Json::Object(map) => Ok(map),
            other => Err(exn::Exn::from(ErrorKind::Protocol(format!("entity is not an object: {other}")))),
        })
        .collect()
}

fn inner<'a>(object: &'a Json, key: &str) -> Option<&'a Json> {
    object.get(key)?.get("value")
}

fn objects(results: &Json, what: &str) -> Result<Map<String, Json>> {
    match results {
        Json::Object(map) => Ok(map.clone()),
        _ => exn::bail!(ErrorKind::Protocol(format!("{what} results are not an object"))),
    }
}

pub(crate) fn schema(results: &Json) -> Result<RawSchema> {
    let mut schema = RawSchema::new();
    for (entity_type, fields) in objects(results, "schema_read")? {
        let mut entity = BTreeMap::new();
        for (name, field) in objects(&fields, "schema_read")? {
            let Some(data_type) = inner(&field, "data_type").and_then(Json::as_str) else {
                tracing::warn!(entity_type = %entity_type, field = %name, "field has no data type, skipping");
                continue;
            };
            let display_name = inner(&field, "name").and_then(Json::as_str).unwrap_or(&name).to_string();
            let valid_types = field
                .get("properties")
                .and_then(|properties| inner(properties, "valid_types"))
                .and_then(Json::as_array)
                .map(|types| types.iter().filter_map(Json::as_str).map(str::to_string).collect::<Vec<_>>())
                .unwrap_or_default();
            entity.insert(name, FieldSchema::new(display_name, data_type.into()).with_valid_types(valid_types));
        }
        schema.insert(entity_type, entity);
    }
    Ok(schema)
}

pub(crate) fn entity_schema(results: &Json) -> Result<RawEntitySchema> {
    let mut entities = RawEntitySchema::new();
    for (entity_type, info) in objects(results, "schema_entity_read")? {
        let display_name = inner(&info, "name").and_then(Json::as_str).unwrap_or(&entity_type).to_string();
        let visible = inner(&info, "visible").and_then(Json::as_bool).unwrap_or(true);
        entities.insert(entity_type, EntityInfo { display_name, visible });
    }
    Ok(entities)
}
