//! Flat attribute tree
//!
//! The host hands state around as a flat map from dotted paths to values,
//! e.g. `listener.3510217042.port = 80`. Collections are announced with a
//! counter entry (`listener.# = 2`, `labels.% = 3`) that also records which
//! kind of collection it is, so a set never silently passes for a list.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Path segment holding the element count of a list, set or single block
pub const COUNT_SEGMENT: &str = "#";

/// Path segment holding the entry count of a map
pub const MAP_COUNT_SEGMENT: &str = "%";

/// Scalar leaf value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Scalar {
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::String(_) => "string",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::String(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::String(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        Scalar::Float(x)
    }
}

/// Kind of collection a counter entry announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    List,
    Set,
    Map,
}

impl CollectionKind {
    pub fn name(&self) -> &'static str {
        match self {
            CollectionKind::List => "list",
            CollectionKind::Set => "set",
            CollectionKind::Map => "map",
        }
    }
}

/// Value stored under one path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrValue {
    Scalar(Scalar),
    Count { kind: CollectionKind, len: usize },
}

impl AttrValue {
    pub fn describe(&self) -> String {
        match self {
            AttrValue::Scalar(s) => s.type_name().to_string(),
            AttrValue::Count { kind, .. } => kind.name().to_string(),
        }
    }
}

/// Join a parent path and a child segment
pub fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", prefix, segment)
    }
}

/// Ordered, path-addressed attribute store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeTree {
    entries: BTreeMap<String, AttrValue>,
}

impl AttributeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&AttrValue> {
        self.entries.get(path)
    }

    /// Scalar at `path`, if any
    pub fn scalar(&self, path: &str) -> Option<&Scalar> {
        match self.entries.get(path) {
            Some(AttrValue::Scalar(s)) => Some(s),
            _ => None,
        }
    }

    /// String scalar at `path`, if any
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.scalar(path).and_then(|s| s.as_str())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn set(&mut self, path: impl Into<String>, value: impl Into<Scalar>) {
        self.entries
            .insert(path.into(), AttrValue::Scalar(value.into()));
    }

    pub fn set_count(&mut self, path: impl Into<String>, kind: CollectionKind, len: usize) {
        self.entries
            .insert(path.into(), AttrValue::Count { kind, len });
    }

    pub fn insert(&mut self, path: impl Into<String>, value: AttrValue) {
        self.entries.insert(path.into(), value);
    }

    pub fn remove(&mut self, path: &str) -> Option<AttrValue> {
        self.entries.remove(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// All entries strictly below `prefix` (i.e. paths starting with `prefix.`)
    pub fn descendants<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a AttrValue)> + 'a {
        let start = format!("{}.", prefix);
        self.entries
            .range(start.clone()..)
            .take_while(move |(k, _)| k.starts_with(&start))
            .map(move |(k, v)| (&k[prefix.len() + 1..], v))
    }

    /// Distinct first segments below `prefix`, counter segments excluded
    pub fn child_segments(&self, prefix: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for (rest, _) in self.descendants(prefix) {
            let segment = rest.split('.').next().unwrap_or(rest);
            if segment == COUNT_SEGMENT || segment == MAP_COUNT_SEGMENT {
                continue;
            }
            if out.last().map(|s| s != segment).unwrap_or(true) {
                out.push(segment.to_string());
            }
        }
        out.dedup();
        out
    }

    /// True when `path` or anything below it is present
    pub fn has_subtree(&self, path: &str) -> bool {
        self.contains(path) || self.descendants(path).next().is_some()
    }

    /// Merge a fragment produced by the encoder, replacing clashing paths
    pub fn merge(&mut self, other: AttributeTree) {
        self.entries.extend(other.entries);
    }

    /// Remove `path` and everything below it
    pub fn remove_subtree(&mut self, path: &str) {
        let start = format!("{}.", path);
        self.entries.remove(path);
        self.entries.retain(|k, _| !k.starts_with(&start));
    }
}

impl FromIterator<(String, AttrValue)> for AttributeTree {
    fn from_iter<I: IntoIterator<Item = (String, AttrValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
