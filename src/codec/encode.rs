//! Structured value → attribute tree ("flatten")

use super::hash::member_key;
use super::schema::{BlockDef, FieldDef, FieldKind};
use super::tree::{join, AttributeTree, CollectionKind, Scalar, COUNT_SEGMENT, MAP_COUNT_SEGMENT};
use super::value::{Block, Value};
use crate::error::{ProviderError, Result};
use std::collections::BTreeMap;

/// Encode a root block into a fresh tree
pub fn encode(block: &Block, def: &BlockDef) -> Result<AttributeTree> {
    let mut tree = AttributeTree::new();
    encode_block_into(&mut tree, "", block, def)?;
    Ok(tree)
}

/// Encode `block` with its fields placed under `prefix`
pub fn encode_block_into(
    tree: &mut AttributeTree,
    prefix: &str,
    block: &Block,
    def: &BlockDef,
) -> Result<()> {
    for (name, value) in block.iter() {
        let path = join(prefix, name);
        let Some(field) = def.field(name) else {
            return Err(ProviderError::mismatch(path, "field defined by the schema", "unknown field"));
        };
        encode_field(tree, &path, value, field)?;
    }
    Ok(())
}

/// Encode one field value at `path`
pub fn encode_field(tree: &mut AttributeTree, path: &str, value: &Value, field: &FieldDef) -> Result<()> {
    match (field.kind, value) {
        (_, Value::Unset) => {}
        (kind, Value::Scalar(s)) if kind.is_scalar() => {
            tree.set(path, check_scalar(s, kind, path)?);
        }
        (FieldKind::List, Value::List(items)) => {
            tree.set_count(join(path, COUNT_SEGMENT), CollectionKind::List, items.len());
            for (i, item) in items.iter().enumerate() {
                encode_element(tree, &join(path, &i.to_string()), item, field)?;
            }
        }
        (FieldKind::Set, Value::Set(items)) => {
            let mut members: BTreeMap<String, &Value> = BTreeMap::new();
            for item in items {
                let key = member_key(item, field);
                match members.get(&key) {
                    Some(existing) if *existing != item => {
                        return Err(ProviderError::SetCollision {
                            path: path.to_string(),
                            key,
                        })
                    }
                    Some(_) => {}
                    None => {
                        members.insert(key, item);
                    }
                }
            }
            tree.set_count(join(path, COUNT_SEGMENT), CollectionKind::Set, members.len());
            for (key, item) in members {
                encode_element(tree, &join(path, &key), item, field)?;
            }
        }
        (FieldKind::Map, Value::Map(map)) => {
            let elem = field.elem_kind().unwrap_or(FieldKind::String);
            tree.set_count(join(path, MAP_COUNT_SEGMENT), CollectionKind::Map, map.len());
            for (key, scalar) in map {
                let entry_path = join(path, key);
                let checked = check_scalar(scalar, elem, &entry_path)?;
                tree.set(entry_path, checked);
            }
        }
        (FieldKind::Block, Value::Block(block)) => {
            let nested = field.block.as_ref().ok_or_else(|| ProviderError::InvalidSchema {
                path: path.to_string(),
                reason: "block without nested fields".into(),
            })?;
            tree.set_count(join(path, COUNT_SEGMENT), CollectionKind::List, 1);
            encode_block_into(tree, &join(path, "0"), block, nested)?;
        }
        (kind, other) => {
            return Err(ProviderError::mismatch(path, kind.name(), other.describe()));
        }
    }
    Ok(())
}

fn encode_element(tree: &mut AttributeTree, path: &str, item: &Value, field: &FieldDef) -> Result<()> {
    match (&field.block, field.elem, item) {
        (Some(nested), _, Value::Block(block)) => encode_block_into(tree, path, block, nested),
        (None, Some(elem), Value::Scalar(s)) => {
            tree.set(path, check_scalar(s, elem, path)?);
            Ok(())
        }
        (Some(_), _, other) => Err(ProviderError::mismatch(path, "block", other.describe())),
        (None, elem, other) => Err(ProviderError::mismatch(
            path,
            elem.map(|k| k.name()).unwrap_or("element"),
            other.describe(),
        )),
    }
}

fn check_scalar(scalar: &Scalar, kind: FieldKind, path: &str) -> Result<Scalar> {
    match (kind, scalar) {
        (FieldKind::String, Scalar::String(_))
        | (FieldKind::Int, Scalar::Int(_))
        | (FieldKind::Float, Scalar::Float(_))
        | (FieldKind::Bool, Scalar::Bool(_)) => Ok(scalar.clone()),
        (FieldKind::Float, Scalar::Int(i)) => Ok(Scalar::Float(*i as f64)),
        _ => Err(ProviderError::mismatch(path, kind.name(), scalar.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode::decode;

    fn target_group_schema() -> BlockDef {
        serde_json::from_value(serde_json::json!({
            "name": {"type": "string"},
            "labels": {"type": "map"},
            "target": {
                "type": "set",
                "block": {
                    "subnet_id": {"type": "string"},
                    "address": {"type": "string"}
                }
            },
            "ports": {"type": "list", "elem": "int"}
        }))
        .unwrap()
    }

    fn target(subnet: &str, address: &str) -> Value {
        Value::Block(Block::new().with("subnet_id", subnet).with("address", address))
    }

    #[test]
    fn test_encode_writes_counts_and_keys() {
        let block = Block::new()
            .with("name", "tg")
            .with("target", Value::Set(vec![target("s1", "10.0.0.1"), target("s2", "10.0.0.2")]))
            .with("ports", Value::List(vec![Value::from(80i64), Value::from(443i64)]));

        let tree = encode(&block, &target_group_schema()).unwrap();
        assert_eq!(tree.get_str("name"), Some("tg"));
        assert_eq!(
            tree.get("target.#"),
            Some(&crate::codec::tree::AttrValue::Count {
                kind: CollectionKind::Set,
                len: 2
            })
        );
        assert_eq!(tree.child_segments("target").len(), 2);
        assert_eq!(tree.scalar("ports.1"), Some(&Scalar::Int(443)));
    }

    #[test]
    fn test_round_trip_ignores_member_order() {
        let def = target_group_schema();
        let a = Block::new().with(
            "target",
            Value::Set(vec![target("s1", "10.0.0.1"), target("s2", "10.0.0.2")]),
        );
        let b = Block::new().with(
            "target",
            Value::Set(vec![target("s2", "10.0.0.2"), target("s1", "10.0.0.1")]),
        );
        let tree_a = encode(&a, &def).unwrap();
        let tree_b = encode(&b, &def).unwrap();
        assert_eq!(tree_a, tree_b);

        let again = encode(&decode(&tree_a, &def).unwrap(), &def).unwrap();
        assert_eq!(again, tree_a);
    }

    #[test]
    fn test_duplicate_members_collapse() {
        let def = target_group_schema();
        let block = Block::new().with(
            "target",
            Value::Set(vec![target("s1", "10.0.0.1"), target("s1", "10.0.0.1")]),
        );
        let tree = encode(&block, &def).unwrap();
        assert_eq!(tree.child_segments("target").len(), 1);
    }

    #[test]
    fn test_kind_mismatch_on_encode() {
        let def = target_group_schema();
        let block = Block::new().with("target", Value::List(vec![target("s1", "a")]));
        assert!(matches!(
            encode(&block, &def),
            Err(ProviderError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_map_keeps_counter() {
        let def = target_group_schema();
        let block = Block::new().with("labels", Value::Map(BTreeMap::new()));
        let tree = encode(&block, &def).unwrap();
        assert!(tree.contains("labels.%"));
        assert_eq!(decode(&tree, &def).unwrap().get("labels"), &Value::Map(BTreeMap::new()));
    }
}
