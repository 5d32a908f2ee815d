//! Structured values
//!
//! Decoded form of an attribute tree. [`Value::Unset`] is kept apart from an
//! empty collection and from a zero scalar: "not configured" and "configured
//! as 0" must never collapse into each other.

use super::tree::Scalar;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Unset,
    Scalar(Scalar),
    List(Vec<Value>),
    /// Members ordered by their set key
    Set(Vec<Value>),
    Map(BTreeMap<String, Scalar>),
    Block(Block),
}

static UNSET: Value = Value::Unset;

impl Value {
    pub fn is_unset(&self) -> bool {
        matches!(self, Value::Unset)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Value::Unset => "unset",
            Value::Scalar(s) => s.type_name(),
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Block(_) => "block",
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(|s| s.as_str())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Scalar(Scalar::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Value::Block(b) => Some(b),
            _ => None,
        }
    }

    /// Elements of a list or set
    pub fn elements(&self) -> &[Value] {
        match self {
            Value::List(items) | Value::Set(items) => items,
            _ => &[],
        }
    }
}

macro_rules! scalar_value_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Scalar(v.into())
                }
            }
        )*
    };
}

scalar_value_from!(Scalar, &str, String, i64, bool, f64);

/// Field values of one block
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    fields: BTreeMap<String, Value>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    /// Field value, [`Value::Unset`] when absent
    pub fn get(&self, name: &str) -> &Value {
        self.fields.get(name).unwrap_or(&UNSET)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).as_str()
    }

    /// Set a field; storing `Unset` removes it
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if value.is_unset() {
            self.fields.remove(&name);
        } else {
            self.fields.insert(name, value);
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value.into());
        self
    }

    pub fn remove(&mut self, name: &str) -> Value {
        self.fields.remove(name).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Block> for Value {
    fn from(b: Block) -> Self {
        Value::Block(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_is_distinct_from_zero_and_empty() {
        let block = Block::new()
            .with("port", 0i64)
            .with("zones", Value::List(vec![]));

        assert!(block.get("missing").is_unset());
        assert_eq!(block.get("port").as_int(), Some(0));
        assert_eq!(block.get("zones"), &Value::List(vec![]));
    }

    #[test]
    fn test_setting_unset_removes_field() {
        let mut block = Block::new().with("name", "a");
        block.set("name", Value::Unset);
        assert!(block.is_empty());
    }
}
