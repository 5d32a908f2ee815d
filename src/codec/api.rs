//! Structured value ↔ API JSON
//!
//! Request bodies and responses follow the REST/JSON mapping of the
//! platform's gRPC services: lowerCamelCase names, int64 as numbers or
//! numeric strings, durations as `"30s"`, enums in upper case.

use super::hash::member_key;
use super::schema::{BlockDef, FieldDef, FieldKind, Transform};
use super::tree::{join, Scalar};
use super::value::{Block, Value};
use crate::error::{ProviderError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;

/// Kind of request body being built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// Defaults applied, required fields checked
    Create,
    /// `force_new` fields left out
    Update,
}

/// Build a request body from a decoded block
pub fn to_api(block: &Block, def: &BlockDef, mode: RequestMode) -> Result<Json> {
    Ok(Json::Object(to_api_block(block, def, "", mode)?))
}

fn to_api_block(
    block: &Block,
    def: &BlockDef,
    prefix: &str,
    mode: RequestMode,
) -> Result<Map<String, Json>> {
    let mut out = Map::new();
    for (name, field) in def.iter() {
        let path = join(prefix, name);
        if field.computed || (mode == RequestMode::Update && field.force_new) {
            continue;
        }

        let mut value = block.get(name).clone();
        if value.is_unset() && mode == RequestMode::Create {
            if let Some(default) = &field.default {
                value = scalar_from_json(default, field.kind, &path)?.into();
            }
        }
        if value.is_unset() {
            if field.required && mode == RequestMode::Create {
                return Err(ProviderError::MissingField { path });
            }
            continue;
        }

        insert_api_path(&mut out, &field.api_name(name), value_to_api(&value, field, &path, mode)?);
    }
    Ok(out)
}

/// Convert one field value into its JSON form
pub fn value_to_api(value: &Value, field: &FieldDef, path: &str, mode: RequestMode) -> Result<Json> {
    match value {
        Value::Unset => Ok(Json::Null),
        Value::Scalar(s) => scalar_to_api(s, field.transform, path),
        Value::List(items) | Value::Set(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let item_path = join(path, &i.to_string());
                let json = match (item, &field.block) {
                    (Value::Block(b), Some(nested)) => {
                        Json::Object(to_api_block(b, nested, &item_path, mode)?)
                    }
                    (Value::Scalar(s), None) => scalar_to_api(s, Transform::None, &item_path)?,
                    (other, _) => {
                        return Err(ProviderError::mismatch(item_path, field.kind.name(), other.describe()))
                    }
                };
                out.push(json);
            }
            Ok(Json::Array(out))
        }
        Value::Map(map) => map
            .iter()
            .map(|(k, v)| scalar_to_api(v, Transform::None, &join(path, k)).map(|json| (k.clone(), json)))
            .collect::<Result<Map<String, Json>>>()
            .map(Json::Object),
        Value::Block(block) => {
            let nested = field.block.as_ref().ok_or_else(|| {
                ProviderError::mismatch(path, field.kind.name(), "block")
            })?;
            Ok(Json::Object(to_api_block(block, nested, path, mode)?))
        }
    }
}

/// Dotted API names nest: `healthChecksSpec.healthCheckSpecs`
fn insert_api_path(out: &mut Map<String, Json>, api_name: &str, value: Json) {
    match api_name.split_once('.') {
        None => {
            out.insert(api_name.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = out
                .entry(head.to_string())
                .or_insert_with(|| Json::Object(Map::new()));
            if let Json::Object(inner) = entry {
                insert_api_path(inner, rest, value);
            }
        }
    }
}

fn lookup_api_path<'a>(object: &'a Map<String, Json>, name: &str) -> Option<&'a Json> {
    let mut segments = name.split('.');
    let mut current = object.get(segments.next()?)?;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current)
}

const GIB: i64 = 1 << 30;

fn scalar_to_api(scalar: &Scalar, transform: Transform, path: &str) -> Result<Json> {
    let json = match (transform, scalar) {
        (Transform::DurationSeconds, Scalar::Int(secs)) => Json::String(format!("{}s", secs)),
        (Transform::Gigabytes, Scalar::Int(gb)) => {
            let bytes = gb
                .checked_mul(GIB)
                .ok_or_else(|| out_of_range(path, &gb.to_string()))?;
            Json::from(bytes)
        }
        (Transform::Gigabytes, Scalar::Float(gb)) => {
            let bytes = (gb * GIB as f64).round();
            // i64::MAX as f64 rounds up to 2^63, which is already out of range
            if !bytes.is_finite() || bytes < i64::MIN as f64 || bytes >= i64::MAX as f64 {
                return Err(out_of_range(path, &gb.to_string()));
            }
            Json::from(bytes as i64)
        }
        (Transform::UpperEnum, Scalar::String(s)) => Json::String(s.to_uppercase()),
        (_, Scalar::Bool(b)) => Json::Bool(*b),
        (_, Scalar::Int(i)) => Json::from(*i),
        (_, Scalar::Float(x)) => Json::from(*x),
        (_, Scalar::String(s)) => Json::String(s.clone()),
    };
    Ok(json)
}

fn out_of_range(path: &str, gb: &str) -> ProviderError {
    ProviderError::mismatch(path, "size in gigabytes that fits in 64-bit bytes", gb)
}

/// Read a response object into a block
pub fn from_api(json: &Json, def: &BlockDef) -> Result<Block> {
    from_api_block(json, def, "")
}

fn from_api_block(json: &Json, def: &BlockDef, prefix: &str) -> Result<Block> {
    let Some(object) = json.as_object() else {
        return Err(ProviderError::mismatch(prefix, "object", json_type(json)));
    };

    let mut block = Block::new();
    for (name, field) in def.iter() {
        let path = join(prefix, name);
        let read_name = field.read_name(name);

        let value = if read_name == "." {
            match &field.block {
                Some(nested) => {
                    let inner = from_api_block(json, nested, &path)?;
                    if inner.is_empty() {
                        Value::Unset
                    } else {
                        Value::Block(inner)
                    }
                }
                None => Value::Unset,
            }
        } else {
            match lookup_api_path(object, &read_name) {
                None | Some(Json::Null) => Value::Unset,
                Some(raw) => value_from_api(raw, field, &path)?,
            }
        };
        block.set(name.clone(), value);
    }
    Ok(block)
}

fn value_from_api(raw: &Json, field: &FieldDef, path: &str) -> Result<Value> {
    match field.kind {
        kind if kind.is_scalar() => Ok(Value::Scalar(scalar_from_api(raw, kind, field.transform, path)?)),
        FieldKind::List | FieldKind::Set => {
            let Some(items) = raw.as_array() else {
                return Err(ProviderError::mismatch(path, "array", json_type(raw)));
            };
            let mut values = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let item_path = join(path, &i.to_string());
                let value = match (&field.block, field.elem) {
                    (Some(nested), _) => Value::Block(from_api_block(item, nested, &item_path)?),
                    (None, Some(elem)) => {
                        Value::Scalar(scalar_from_api(item, elem, Transform::None, &item_path)?)
                    }
                    (None, None) => {
                        return Err(ProviderError::InvalidSchema {
                            path: path.to_string(),
                            reason: "collection without element type".into(),
                        })
                    }
                };
                values.push(value);
            }
            if field.kind == FieldKind::Set {
                Ok(Value::Set(sort_members(values, field)))
            } else {
                Ok(Value::List(values))
            }
        }
        FieldKind::Map => {
            let Some(object) = raw.as_object() else {
                return Err(ProviderError::mismatch(path, "object", json_type(raw)));
            };
            let elem = field.elem_kind().unwrap_or(FieldKind::String);
            let mut map = BTreeMap::new();
            for (key, item) in object {
                map.insert(
                    key.clone(),
                    scalar_from_api(item, elem, Transform::None, &join(path, key))?,
                );
            }
            Ok(Value::Map(map))
        }
        FieldKind::Block => match &field.block {
            Some(nested) => Ok(Value::Block(from_api_block(raw, nested, path)?)),
            None => Err(ProviderError::InvalidSchema {
                path: path.to_string(),
                reason: "block without nested fields".into(),
            }),
        },
        _ => Ok(Value::Unset),
    }
}

fn scalar_from_api(raw: &Json, kind: FieldKind, transform: Transform, path: &str) -> Result<Scalar> {
    let mismatch = || ProviderError::mismatch(path, kind.name(), json_type(raw));
    match (kind, transform) {
        (FieldKind::Int, Transform::DurationSeconds) => match raw {
            Json::String(s) => parse_duration_seconds(s).ok_or_else(mismatch).map(Scalar::Int),
            Json::Number(n) => n.as_i64().ok_or_else(mismatch).map(Scalar::Int),
            _ => Err(mismatch()),
        },
        (kind, Transform::Gigabytes) => {
            let Scalar::Int(bytes) = scalar_from_json(raw, FieldKind::Int, path)? else {
                return Err(mismatch());
            };
            match kind {
                FieldKind::Float => Ok(Scalar::Float(bytes as f64 / GIB as f64)),
                _ => Ok(Scalar::Int(bytes / GIB)),
            }
        }
        (FieldKind::String, Transform::UpperEnum) => raw
            .as_str()
            .map(|s| Scalar::String(s.to_lowercase()))
            .ok_or_else(mismatch),
        (FieldKind::String, Transform::Timestamp) => {
            let s = raw.as_str().ok_or_else(mismatch)?;
            let parsed = DateTime::parse_from_rfc3339(s).map_err(|_| mismatch())?;
            Ok(Scalar::String(
                parsed
                    .with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            ))
        }
        _ => scalar_from_json(raw, kind, path),
    }
}

/// Plain JSON → scalar of `kind`; int64 may arrive as a string
pub fn scalar_from_json(raw: &Json, kind: FieldKind, path: &str) -> Result<Scalar> {
    let mismatch = || ProviderError::mismatch(path, kind.name(), json_type(raw));
    match (kind, raw) {
        (FieldKind::String, Json::String(s)) => Ok(Scalar::String(s.clone())),
        (FieldKind::Bool, Json::Bool(b)) => Ok(Scalar::Bool(*b)),
        (FieldKind::Int, Json::Number(n)) => n.as_i64().map(Scalar::Int).ok_or_else(mismatch),
        (FieldKind::Int, Json::String(s)) => s.parse().map(Scalar::Int).map_err(|_| mismatch()),
        (FieldKind::Float, Json::Number(n)) => n.as_f64().map(Scalar::Float).ok_or_else(mismatch),
        (FieldKind::Float, Json::String(s)) => s.parse().map(Scalar::Float).map_err(|_| mismatch()),
        _ => Err(mismatch()),
    }
}

/// `"30s"` / `"1.500s"` → whole seconds
fn parse_duration_seconds(s: &str) -> Option<i64> {
    let number = s.strip_suffix('s')?;
    match number.split_once('.') {
        Some((whole, _)) => whole.parse().ok(),
        None => number.parse().ok(),
    }
}

/// Order set members by key and drop exact duplicates
pub fn sort_members(items: Vec<Value>, field: &FieldDef) -> Vec<Value> {
    let mut keyed: Vec<(String, Value)> = items
        .into_iter()
        .map(|item| (member_key(&item, field), item))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|a, b| a.0 == b.0 && a.1 == b.1);
    keyed.into_iter().map(|(_, item)| item).collect()
}

/// Block as a create request would carry it: defaults filled in, computed
/// fields dropped, at every nesting level
pub fn settle(block: &Block, def: &BlockDef) -> Result<Block> {
    settle_block(block, def, "")
}

fn settle_block(block: &Block, def: &BlockDef, prefix: &str) -> Result<Block> {
    let mut out = Block::new();
    for (name, field) in def.iter() {
        if field.computed {
            continue;
        }
        let path = join(prefix, name);
        let value = match (block.get(name), &field.default, &field.block) {
            (Value::Unset, Some(default), _) => scalar_from_json(default, field.kind, &path)?.into(),
            (Value::Block(inner), _, Some(nested)) => Value::Block(settle_block(inner, nested, &path)?),
            (Value::List(items), _, Some(nested)) => Value::List(settle_items(items, nested, &path)?),
            (Value::Set(items), _, Some(nested)) => {
                Value::Set(sort_members(settle_items(items, nested, &path)?, field))
            }
            (other, _, _) => other.clone(),
        };
        out.set(name.clone(), value);
    }
    Ok(out)
}

fn settle_items(items: &[Value], nested: &BlockDef, path: &str) -> Result<Vec<Value>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Block(b) => Ok(Value::Block(settle_block(b, nested, &join(path, &i.to_string()))?)),
            other => Ok(other.clone()),
        })
        .collect()
}

fn json_type(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn health_check_schema() -> BlockDef {
        serde_json::from_value(json!({
            "name": {"type": "string", "required": true},
            "interval": {"type": "int", "transform": "duration_seconds", "default": 2},
            "healthy_threshold": {"type": "int", "default": 2},
            "protocol": {"type": "string", "transform": "upper_enum"},
            "created_at": {"type": "string", "computed": true, "transform": "timestamp"},
            "folder_id": {"type": "string", "force_new": true},
            "http_options": {
                "type": "block",
                "read_api": ".",
                "block": {"port": {"type": "int", "read_api": "httpPort"}}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_create_applies_defaults_and_transforms() {
        let block = Block::new()
            .with("name", "hc")
            .with("protocol", "tcp")
            .with("created_at", "2020-01-01T00:00:00Z");
        let body = to_api(&block, &health_check_schema(), RequestMode::Create).unwrap();
        assert_eq!(
            body,
            json!({
                "name": "hc",
                "interval": "2s",
                "healthyThreshold": 2,
                "protocol": "TCP"
            })
        );
    }

    #[test]
    fn test_create_requires_required_fields() {
        let err = to_api(&Block::new(), &health_check_schema(), RequestMode::Create).unwrap_err();
        assert!(matches!(err, ProviderError::MissingField { ref path } if path == "name"));
    }

    #[test]
    fn test_update_skips_force_new() {
        let block = Block::new().with("name", "hc").with("folder_id", "f1");
        let body = to_api(&block, &health_check_schema(), RequestMode::Update).unwrap();
        assert_eq!(body, json!({"name": "hc"}));
    }

    #[test]
    fn test_from_api_reads_transforms() {
        let response = json!({
            "name": "hc",
            "interval": "30s",
            "healthyThreshold": "3",
            "protocol": "HTTP",
            "createdAt": "2024-03-01T10:20:30.123+03:00",
            "httpPort": 8080,
            "unrelated": true
        });
        let block = from_api(&response, &health_check_schema()).unwrap();
        assert_eq!(block.get("interval").as_int(), Some(30));
        assert_eq!(block.get("healthy_threshold").as_int(), Some(3));
        assert_eq!(block.get_str("protocol"), Some("http"));
        assert_eq!(block.get_str("created_at"), Some("2024-03-01T07:20:30Z"));
        let http = block.get("http_options").as_block().unwrap();
        assert_eq!(http.get("port").as_int(), Some(8080));
        assert!(block.get("folder_id").is_unset());
    }

    #[test]
    fn test_parent_read_block_absent_when_empty() {
        let block = from_api(&json!({"name": "hc"}), &health_check_schema()).unwrap();
        assert!(block.get("http_options").is_unset());
    }

    #[test]
    fn test_dotted_api_names_and_sizes() {
        let def: BlockDef = serde_json::from_value(json!({
            "memory": {"type": "float", "api": "resourcesSpec.memory", "transform": "gigabytes"},
            "cores": {"type": "int", "api": "resourcesSpec.cores"}
        }))
        .unwrap();
        let block = Block::new().with("memory", 0.5).with("cores", 2i64);
        let body = to_api(&block, &def, RequestMode::Create).unwrap();
        assert_eq!(body, json!({"resourcesSpec": {"memory": 536870912, "cores": 2}}));

        let back = from_api(&json!({"resourcesSpec": {"memory": "2147483648", "cores": "2"}}), &def).unwrap();
        assert_eq!(back.get("memory"), &Value::from(2.0));
        assert_eq!(back.get("cores").as_int(), Some(2));
    }

    #[test]
    fn test_gigabytes_at_the_bounds() {
        let def: BlockDef = serde_json::from_value(json!({
            "size": {"type": "int", "transform": "gigabytes"},
            "memory": {"type": "float", "transform": "gigabytes"}
        }))
        .unwrap();
        let largest = i64::MAX / GIB;

        let body = to_api(&Block::new().with("size", largest), &def, RequestMode::Create).unwrap();
        assert_eq!(body["size"], json!(largest * GIB));

        for size in [largest + 1, 9_000_000_000, i64::MAX, i64::MIN] {
            let err = to_api(&Block::new().with("size", size), &def, RequestMode::Create).unwrap_err();
            assert!(matches!(err, ProviderError::SchemaMismatch { ref path, .. } if path == "size"), "{:?}", err);
        }

        let body = to_api(&Block::new().with("memory", 0.5), &def, RequestMode::Create).unwrap();
        assert_eq!(body["memory"], json!(GIB / 2));
        for memory in [f64::INFINITY, f64::NAN, 1e10] {
            let err = to_api(&Block::new().with("memory", memory), &def, RequestMode::Create).unwrap_err();
            assert!(matches!(err, ProviderError::SchemaMismatch { .. }), "{:?}", err);
        }
    }

    #[test]
    fn test_settle_fills_nested_defaults() {
        let def: BlockDef = serde_json::from_value(json!({
            "id": {"type": "string", "computed": true},
            "checks": {"type": "list", "block": {
                "name": {"type": "string"},
                "interval": {"type": "int", "default": 2}
            }}
        }))
        .unwrap();
        let block = Block::new()
            .with("id", "x")
            .with("checks", Value::List(vec![Block::new().with("name", "a").into()]));

        let settled = settle(&block, &def).unwrap();
        assert!(settled.get("id").is_unset());
        let check = settled.get("checks").elements()[0].as_block().unwrap();
        assert_eq!(check.get("interval").as_int(), Some(2));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_seconds("30s"), Some(30));
        assert_eq!(parse_duration_seconds("1.500s"), Some(1));
        assert_eq!(parse_duration_seconds("30"), None);
    }
}
