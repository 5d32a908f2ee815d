//! Set member keys
//!
//! A set member is keyed by a hash of its content. Fields are visited in
//! name order and every piece is length-prefixed and type-tagged, so
//! `{a: "x-", b: "y"}` and `{a: "x", b: "-y"}` never share an encoding.
//! Equal keys for distinct members are still possible (the digest is
//! truncated to 32 bits); the encoder reports that as `SetCollision`.

use super::schema::FieldDef;
use super::tree::Scalar;
use super::value::{Block, Value};
use sha2::{Digest, Sha256};

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn write_scalar(buf: &mut Vec<u8>, scalar: &Scalar) {
    match scalar {
        Scalar::Bool(b) => {
            buf.push(b'b');
            buf.push(*b as u8);
        }
        Scalar::Int(i) => {
            buf.push(b'i');
            buf.extend_from_slice(&i.to_be_bytes());
        }
        Scalar::Float(x) => {
            buf.push(b'f');
            buf.extend_from_slice(&x.to_bits().to_be_bytes());
        }
        Scalar::String(s) => {
            buf.push(b's');
            write_bytes(buf, s.as_bytes());
        }
    }
}

fn write_block(buf: &mut Vec<u8>, block: &Block, only: &[String]) {
    buf.push(b'{');
    for (name, value) in block.iter() {
        if !only.is_empty() && !only.contains(name) {
            continue;
        }
        write_bytes(buf, name.as_bytes());
        write_value(buf, value);
    }
    buf.push(b'}');
}

fn write_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Unset => buf.push(b'u'),
        Value::Scalar(s) => write_scalar(buf, s),
        Value::List(items) => {
            buf.push(b'l');
            buf.extend_from_slice(&(items.len() as u64).to_be_bytes());
            for item in items {
                write_value(buf, item);
            }
        }
        Value::Set(items) => {
            // Inner members are unordered; hash them in encoding order
            let mut encoded: Vec<Vec<u8>> = items
                .iter()
                .map(|item| {
                    let mut inner = Vec::new();
                    write_value(&mut inner, item);
                    inner
                })
                .collect();
            encoded.sort();
            buf.push(b't');
            buf.extend_from_slice(&(encoded.len() as u64).to_be_bytes());
            for inner in &encoded {
                write_bytes(buf, inner);
            }
        }
        Value::Map(map) => {
            buf.push(b'm');
            buf.extend_from_slice(&(map.len() as u64).to_be_bytes());
            for (k, v) in map {
                write_bytes(buf, k.as_bytes());
                write_scalar(buf, v);
            }
        }
        Value::Block(block) => write_block(buf, block, &[]),
    }
}

/// Key of one set member, as used in the attribute path
pub fn member_key(member: &Value, field: &FieldDef) -> String {
    let mut buf = Vec::new();
    match member {
        Value::Block(block) => write_block(&mut buf, block, &field.hash_keys),
        other => write_value(&mut buf, other),
    }
    let digest = Sha256::digest(&buf);
    let key = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::schema::FieldKind;

    fn set_field(hash_keys: &[&str]) -> FieldDef {
        serde_json::from_value(serde_json::json!({
            "type": "set",
            "hash_keys": hash_keys,
            "block": {
                "subnet_id": {"type": "string"},
                "address": {"type": "string"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_key_ignores_insertion_order() {
        let field = set_field(&[]);
        let a = Value::Block(Block::new().with("subnet_id", "s1").with("address", "10.0.0.1"));
        let b = Value::Block(Block::new().with("address", "10.0.0.1").with("subnet_id", "s1"));
        assert_eq!(member_key(&a, &field), member_key(&b, &field));
    }

    #[test]
    fn test_concatenation_ambiguity_is_gone() {
        // Joining with '-' would make both of these "a-b--"
        let field = set_field(&[]);
        let a = Value::Block(Block::new().with("subnet_id", "a-b").with("address", "-"));
        let b = Value::Block(Block::new().with("subnet_id", "a").with("address", "b--"));
        assert_ne!(member_key(&a, &field), member_key(&b, &field));
    }

    #[test]
    fn test_hash_keys_pick_identity() {
        let field = set_field(&["subnet_id"]);
        let a = Value::Block(Block::new().with("subnet_id", "s1").with("address", "10.0.0.1"));
        let b = Value::Block(Block::new().with("subnet_id", "s1").with("address", "10.0.0.2"));
        assert_eq!(member_key(&a, &field), member_key(&b, &field));
        assert_eq!(field.kind, FieldKind::Set);
    }

    #[test]
    fn test_nested_set_order_does_not_change_key() {
        let field: FieldDef = serde_json::from_value(serde_json::json!({
            "type": "set",
            "block": {
                "network_id": {"type": "string"},
                "subnet_ids": {"type": "set", "elem": "string"}
            }
        }))
        .unwrap();
        let member = |subnets: &[&str]| {
            Value::Block(
                Block::new()
                    .with("network_id", "enp1")
                    .with("subnet_ids", Value::Set(subnets.iter().map(|s| Value::from(*s)).collect())),
            )
        };
        assert_eq!(
            member_key(&member(&["e9b1", "e2l2"]), &field),
            member_key(&member(&["e2l2", "e9b1"]), &field)
        );
        assert_ne!(
            member_key(&member(&["e9b1", "e2l2"]), &field),
            member_key(&member(&["e9b1"]), &field)
        );
    }

    #[test]
    fn test_scalar_members_differ_by_type() {
        let field: FieldDef =
            serde_json::from_value(serde_json::json!({"type": "set", "elem": "string"})).unwrap();
        assert_ne!(
            member_key(&Value::from("1"), &field),
            member_key(&Value::from(1i64), &field)
        );
    }
}
