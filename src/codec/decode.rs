//! Attribute tree → structured value ("expand")

use super::schema::{BlockDef, FieldDef, FieldKind};
use super::tree::{join, AttrValue, AttributeTree, CollectionKind, Scalar, COUNT_SEGMENT, MAP_COUNT_SEGMENT};
use super::value::{Block, Value};
use crate::error::{ProviderError, Result};
use std::collections::BTreeMap;

/// Decode the whole tree against a resource schema, rejecting unknown paths
pub fn decode_resource(tree: &AttributeTree, def: &BlockDef) -> Result<Block> {
    check_paths(tree, def)?;
    decode(tree, def)
}

/// Decode the root block of `tree`
pub fn decode(tree: &AttributeTree, def: &BlockDef) -> Result<Block> {
    decode_block(tree, "", def)
}

/// Decode the block whose fields live under `prefix`
pub fn decode_block(tree: &AttributeTree, prefix: &str, def: &BlockDef) -> Result<Block> {
    let mut block = Block::new();
    for (name, field) in def.iter() {
        let value = decode_field(tree, &join(prefix, name), field)?;
        block.set(name.clone(), value);
    }
    check_conflicts(&block, prefix, def)?;
    Ok(block)
}

/// Decode one field located at `path`
pub fn decode_field(tree: &AttributeTree, path: &str, field: &FieldDef) -> Result<Value> {
    if field.kind.is_scalar() {
        return match tree.get(path) {
            None => Ok(Value::Unset),
            Some(AttrValue::Scalar(s)) => Ok(Value::Scalar(coerce(s, field.kind, path)?)),
            Some(other) => Err(ProviderError::mismatch(path, field.kind.name(), other.describe())),
        };
    }

    if let Some(AttrValue::Scalar(s)) = tree.get(path) {
        return Err(ProviderError::mismatch(path, field.kind.name(), s.type_name()));
    }

    let expected = match field.kind {
        FieldKind::Set => CollectionKind::Set,
        FieldKind::Map => CollectionKind::Map,
        _ => CollectionKind::List,
    };
    let Some(len) = collection_len(tree, path, field.kind, expected)? else {
        return Ok(Value::Unset);
    };

    match field.kind {
        FieldKind::List => {
            let items = (0..len)
                .map(|i| decode_element(tree, &join(path, &i.to_string()), field))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::List(items))
        }
        FieldKind::Set => {
            let members = tree.child_segments(path);
            if members.len() != len {
                return Err(ProviderError::mismatch(
                    path,
                    format!("{} set members", len),
                    format!("{} members", members.len()),
                ));
            }
            let items = members
                .iter()
                .map(|key| decode_element(tree, &join(path, key), field))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Set(items))
        }
        FieldKind::Map => {
            let elem = field.elem_kind().unwrap_or(FieldKind::String);
            let mut map = BTreeMap::new();
            for (key, value) in tree.descendants(path) {
                if key == MAP_COUNT_SEGMENT {
                    continue;
                }
                let entry_path = join(path, key);
                match value {
                    AttrValue::Scalar(s) => {
                        map.insert(key.to_string(), coerce(s, elem, &entry_path)?);
                    }
                    other => {
                        return Err(ProviderError::mismatch(entry_path, elem.name(), other.describe()))
                    }
                }
            }
            if map.len() != len {
                return Err(ProviderError::mismatch(
                    path,
                    format!("{} map entries", len),
                    format!("{} entries", map.len()),
                ));
            }
            Ok(Value::Map(map))
        }
        FieldKind::Block => match len {
            0 => Ok(Value::Unset),
            1 => {
                let nested = nested_block(field, path)?;
                Ok(Value::Block(decode_block(tree, &join(path, "0"), nested)?))
            }
            n => Err(ProviderError::mismatch(path, "at most 1 block", format!("{} blocks", n))),
        },
        _ => unreachable!("scalar kinds handled above"),
    }
}

/// Length announced by the counter entry of a collection at `path`
fn collection_len(
    tree: &AttributeTree,
    path: &str,
    kind: FieldKind,
    expected: CollectionKind,
) -> Result<Option<usize>> {
    let list_counter = tree.get(&join(path, COUNT_SEGMENT));
    let map_counter = tree.get(&join(path, MAP_COUNT_SEGMENT));
    let counter = if expected == CollectionKind::Map {
        map_counter.or(list_counter)
    } else {
        list_counter.or(map_counter)
    };

    match counter {
        Some(AttrValue::Count { kind: found, len }) if *found == expected => Ok(Some(*len)),
        Some(other) => Err(ProviderError::mismatch(path, kind.name(), other.describe())),
        None if tree.has_subtree(path) => Err(ProviderError::mismatch(
            path,
            kind.name(),
            "elements without a count entry",
        )),
        None => Ok(None),
    }
}

fn decode_element(tree: &AttributeTree, path: &str, field: &FieldDef) -> Result<Value> {
    match (&field.block, field.elem) {
        (Some(nested), _) => Ok(Value::Block(decode_block(tree, path, nested)?)),
        (None, Some(elem)) => match tree.get(path) {
            Some(AttrValue::Scalar(s)) => Ok(Value::Scalar(coerce(s, elem, path)?)),
            Some(other) => Err(ProviderError::mismatch(path, elem.name(), other.describe())),
            None => Err(ProviderError::mismatch(path, elem.name(), "nothing")),
        },
        (None, None) => Err(ProviderError::InvalidSchema {
            path: path.to_string(),
            reason: "collection without element type".into(),
        }),
    }
}

fn nested_block<'a>(field: &'a FieldDef, path: &str) -> Result<&'a BlockDef> {
    field.block.as_ref().ok_or_else(|| ProviderError::InvalidSchema {
        path: path.to_string(),
        reason: "block without nested fields".into(),
    })
}

/// Check a stored scalar against the expected kind; ints widen to floats
fn coerce(scalar: &Scalar, kind: FieldKind, path: &str) -> Result<Scalar> {
    match (kind, scalar) {
        (FieldKind::String, Scalar::String(_))
        | (FieldKind::Int, Scalar::Int(_))
        | (FieldKind::Float, Scalar::Float(_))
        | (FieldKind::Bool, Scalar::Bool(_)) => Ok(scalar.clone()),
        (FieldKind::Float, Scalar::Int(i)) => Ok(Scalar::Float(*i as f64)),
        _ => Err(ProviderError::mismatch(path, kind.name(), scalar.type_name())),
    }
}

/// Mutually exclusive siblings: at most one may be present
pub(crate) fn check_conflicts(block: &Block, prefix: &str, def: &BlockDef) -> Result<()> {
    for (name, field) in def.iter() {
        if block.get(name).is_unset() {
            continue;
        }
        for other in &field.conflicts_with {
            if !block.get(other).is_unset() {
                let (first, second) = if name < other {
                    (name, other)
                } else {
                    (other, name)
                };
                return Err(ProviderError::ConflictingFields {
                    first: join(prefix, first),
                    second: join(prefix, second),
                });
            }
        }
    }
    Ok(())
}

/// Every path in the tree must be reachable by walking the schema
pub fn check_paths(tree: &AttributeTree, def: &BlockDef) -> Result<()> {
    for key in tree.keys() {
        let segments: Vec<&str> = key.split('.').collect();
        if !reachable(def, &segments) {
            return Err(ProviderError::mismatch(
                key.as_str(),
                "path defined by the schema",
                "unknown attribute",
            ));
        }
    }
    Ok(())
}

fn reachable(def: &BlockDef, segments: &[&str]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    let Some(field) = def.field(first) else {
        return false;
    };

    match field.kind {
        k if k.is_scalar() => rest.is_empty(),
        FieldKind::Map => !rest.is_empty(),
        _ => {
            let Some((segment, tail)) = rest.split_first() else {
                return false;
            };
            if *segment == COUNT_SEGMENT {
                return tail.is_empty();
            }
            let index_ok = match field.kind {
                FieldKind::Set => !segment.is_empty(),
                FieldKind::Block => *segment == "0",
                _ => segment.parse::<usize>().is_ok(),
            };
            if !index_ok {
                return false;
            }
            match &field.block {
                Some(nested) => reachable(nested, tail),
                None => tail.is_empty(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tree::CollectionKind;

    fn health_check_schema() -> BlockDef {
        serde_json::from_value(serde_json::json!({
            "name": {"type": "string"},
            "interval": {"type": "int"},
            "zones": {"type": "list", "elem": "string"},
            "http_options": {
                "type": "block",
                "conflicts_with": ["tcp_options"],
                "block": {"port": {"type": "int"}, "path": {"type": "string"}}
            },
            "tcp_options": {
                "type": "block",
                "conflicts_with": ["http_options"],
                "block": {"port": {"type": "int"}}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_absent_fields_decode_to_unset() {
        let tree = AttributeTree::new();
        let block = decode(&tree, &health_check_schema()).unwrap();
        assert!(block.get("name").is_unset());
        assert!(block.get("zones").is_unset());
        assert!(block.get("http_options").is_unset());
    }

    #[test]
    fn test_empty_list_and_zero_are_not_unset() {
        let mut tree = AttributeTree::new();
        tree.set("interval", 0i64);
        tree.set_count("zones.#", CollectionKind::List, 0);
        let block = decode(&tree, &health_check_schema()).unwrap();
        assert_eq!(block.get("interval").as_int(), Some(0));
        assert_eq!(block.get("zones"), &Value::List(vec![]));
    }

    #[test]
    fn test_both_options_conflict() {
        let mut tree = AttributeTree::new();
        tree.set_count("http_options.#", CollectionKind::List, 1);
        tree.set("http_options.0.port", 80i64);
        tree.set("http_options.0.path", "/ping");
        tree.set_count("tcp_options.#", CollectionKind::List, 1);
        tree.set("tcp_options.0.port", 8080i64);

        match decode(&tree, &health_check_schema()) {
            Err(ProviderError::ConflictingFields { first, second }) => {
                assert_eq!(first, "http_options");
                assert_eq!(second, "tcp_options");
            }
            other => panic!("expected ConflictingFields, got {:?}", other),
        }
    }

    #[test]
    fn test_set_where_list_expected() {
        let mut tree = AttributeTree::new();
        tree.set_count("zones.#", CollectionKind::Set, 1);
        tree.set("zones.123", "ru-central1-a");
        let err = decode(&tree, &health_check_schema()).unwrap_err();
        assert!(matches!(err, ProviderError::SchemaMismatch { ref path, .. } if path == "zones"));
    }

    #[test]
    fn test_scalar_type_mismatch() {
        let mut tree = AttributeTree::new();
        tree.set("interval", "often");
        let err = decode(&tree, &health_check_schema()).unwrap_err();
        assert!(matches!(err, ProviderError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_block_with_two_elements_rejected() {
        let mut tree = AttributeTree::new();
        tree.set_count("tcp_options.#", CollectionKind::List, 2);
        tree.set("tcp_options.0.port", 1i64);
        tree.set("tcp_options.1.port", 2i64);
        assert!(decode(&tree, &health_check_schema()).is_err());
    }

    #[test]
    fn test_unknown_path_rejected_by_resource_decode() {
        let mut tree = AttributeTree::new();
        tree.set("name", "hc");
        tree.set("nmae", "typo");
        assert!(decode(&tree, &health_check_schema()).is_ok());
        assert!(decode_resource(&tree, &health_check_schema()).is_err());
    }

    #[test]
    fn test_reachable_paths() {
        let def = health_check_schema();
        let mut tree = AttributeTree::new();
        tree.set_count("zones.#", CollectionKind::List, 1);
        tree.set("zones.0", "a");
        tree.set_count("tcp_options.#", CollectionKind::List, 1);
        tree.set("tcp_options.0.port", 1i64);
        assert!(check_paths(&tree, &def).is_ok());

        tree.set("tcp_options.1.port", 1i64);
        assert!(check_paths(&tree, &def).is_err());
    }
}
