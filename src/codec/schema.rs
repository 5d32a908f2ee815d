//! Field descriptors
//!
//! Every resource kind is described by a [`BlockDef`]: field name → kind →
//! nested block. Descriptors come from the embedded JSON tables and are
//! checked once by [`BlockDef::validate`] so the codec can trust them.

use crate::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// Kind tag of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Int,
    Float,
    Bool,
    List,
    Set,
    Map,
    /// Nested block with at most one element
    Block,
}

impl FieldKind {
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            FieldKind::String | FieldKind::Int | FieldKind::Float | FieldKind::Bool
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::List => "list",
            FieldKind::Set => "set",
            FieldKind::Map => "map",
            FieldKind::Block => "block",
        }
    }
}

/// Value conversion applied between the attribute form and the API form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    #[default]
    None,
    /// Integer seconds ↔ protobuf JSON duration (`"30s"`)
    DurationSeconds,
    /// Lowercase attribute ↔ uppercase API enum
    UpperEnum,
    /// RFC 3339 timestamp, normalized to UTC seconds precision
    Timestamp,
    /// Gigabytes ↔ bytes
    Gigabytes,
}

/// One field of a block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub kind: FieldKind,

    /// Element kind of a scalar list/set/map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elem: Option<FieldKind>,

    /// Nested fields of a block, or of each list/set member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<BlockDef>,

    /// Remote JSON name (defaults to lowerCamelCase of the field name); dots nest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,

    /// Remote JSON name in responses when it differs; "." reads the parent object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_api: Option<String>,

    #[serde(default)]
    pub required: bool,

    /// Set by the server only, never sent
    #[serde(default)]
    pub computed: bool,

    /// Cannot be changed in place, never sent in updates
    #[serde(default)]
    pub force_new: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts_with: Vec<String>,

    /// Member fields identifying a set element (all fields when empty)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hash_keys: Vec<String>,

    #[serde(default)]
    pub transform: Transform,

    /// Applied to unset fields of a create request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Json>,
}

/// Ordered set of fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockDef {
    pub fields: BTreeMap<String, FieldDef>,
}

/// Convert `snake_case` to `lowerCamelCase`
pub fn lower_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

impl FieldDef {
    /// Name used in request bodies
    pub fn api_name(&self, field: &str) -> String {
        self.api.clone().unwrap_or_else(|| lower_camel(field))
    }

    /// Name used when reading responses
    pub fn read_name(&self, field: &str) -> String {
        self.read_api.clone().unwrap_or_else(|| self.api_name(field))
    }

    /// Kind of the elements of a collection, or of a map's values
    pub fn elem_kind(&self) -> Option<FieldKind> {
        match self.kind {
            FieldKind::Map => Some(self.elem.unwrap_or(FieldKind::String)),
            _ => self.elem,
        }
    }

    fn validate(&self, path: &str, siblings: &BTreeMap<String, FieldDef>) -> Result<()> {
        let invalid = |reason: String| ProviderError::InvalidSchema {
            path: path.to_string(),
            reason,
        };

        match self.kind {
            k if k.is_scalar() => {
                if self.elem.is_some() || self.block.is_some() {
                    return Err(invalid(format!("scalar '{}' cannot have elem or block", k.name())));
                }
            }
            FieldKind::List | FieldKind::Set => match (&self.elem, &self.block) {
                (Some(elem), None) if elem.is_scalar() => {}
                (None, Some(block)) => block.validate_at(path)?,
                _ => {
                    return Err(invalid(
                        "collection needs exactly one of a scalar elem or a block".into(),
                    ))
                }
            },
            FieldKind::Map => {
                if self.block.is_some() || !self.elem_kind().map(|k| k.is_scalar()).unwrap_or(false) {
                    return Err(invalid("map values must be scalar".into()));
                }
            }
            FieldKind::Block => match &self.block {
                Some(block) if self.elem.is_none() => block.validate_at(path)?,
                _ => return Err(invalid("block needs nested fields and no elem".into())),
            },
            _ => {}
        }

        for other in &self.conflicts_with {
            if !siblings.contains_key(other) {
                return Err(invalid(format!("conflicts_with names unknown field '{}'", other)));
            }
        }

        if !self.hash_keys.is_empty() {
            let Some(block) = self.block.as_ref().filter(|_| self.kind == FieldKind::Set) else {
                return Err(invalid("hash_keys only apply to sets of blocks".into()));
            };
            for key in &self.hash_keys {
                match block.fields.get(key) {
                    Some(f) if f.kind.is_scalar() => {}
                    _ => return Err(invalid(format!("hash key '{}' is not a scalar member", key))),
                }
            }
        }

        let transform_ok = match self.transform {
            Transform::None => true,
            Transform::DurationSeconds => self.kind == FieldKind::Int,
            Transform::UpperEnum | Transform::Timestamp => self.kind == FieldKind::String,
            Transform::Gigabytes => matches!(self.kind, FieldKind::Int | FieldKind::Float),
        };
        if !transform_ok {
            return Err(invalid(format!(
                "transform {:?} does not apply to {}",
                self.transform,
                self.kind.name()
            )));
        }

        if self.read_api.as_deref() == Some(".") && self.kind != FieldKind::Block {
            return Err(invalid("read_api \".\" only applies to blocks".into()));
        }

        if let Some(default) = &self.default {
            let fits = match self.kind {
                FieldKind::String => default.is_string(),
                FieldKind::Int => default.is_i64(),
                FieldKind::Float => default.is_number(),
                FieldKind::Bool => default.is_boolean(),
                _ => false,
            };
            if !fits {
                return Err(invalid(format!("default {} does not fit {}", default, self.kind.name())));
            }
        }

        Ok(())
    }
}

impl BlockDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldDef)> {
        self.fields.iter()
    }

    /// Check descriptors once, at load time
    pub fn validate(&self) -> Result<()> {
        self.validate_at("")
    }

    fn validate_at(&self, prefix: &str) -> Result<()> {
        for (name, field) in &self.fields {
            if name.is_empty() || name.contains('.') || name == "#" || name == "%" {
                return Err(ProviderError::InvalidSchema {
                    path: prefix.to_string(),
                    reason: format!("invalid field name '{}'", name),
                });
            }
            field.validate(&super::tree::join(prefix, name), &self.fields)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: Json) -> BlockDef {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_lower_camel() {
        assert_eq!(lower_camel("target_group_id"), "targetGroupId");
        assert_eq!(lower_camel("name"), "name");
        assert_eq!(lower_camel("ipv6"), "ipv6");
    }

    #[test]
    fn test_valid_schema_passes() {
        let block = parse(serde_json::json!({
            "name": {"type": "string", "required": true},
            "zones": {"type": "set", "elem": "string"},
            "labels": {"type": "map"},
            "listener": {
                "type": "set",
                "hash_keys": ["name"],
                "block": {
                    "name": {"type": "string"},
                    "port": {"type": "int"}
                }
            },
            "http_options": {"type": "block", "conflicts_with": ["tcp_options"], "block": {"port": {"type": "int"}}},
            "tcp_options": {"type": "block", "conflicts_with": ["http_options"], "block": {"port": {"type": "int"}}},
            "interval": {"type": "int", "transform": "duration_seconds"}
        }));
        assert!(block.validate().is_ok());
    }

    #[test]
    fn test_unknown_conflict_rejected() {
        let block = parse(serde_json::json!({
            "http_options": {"type": "block", "conflicts_with": ["nope"], "block": {}}
        }));
        assert!(matches!(
            block.validate(),
            Err(ProviderError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_collection_without_elem_rejected() {
        let block = parse(serde_json::json!({"zones": {"type": "list"}}));
        assert!(block.validate().is_err());
    }

    #[test]
    fn test_hash_keys_must_be_members() {
        let block = parse(serde_json::json!({
            "target": {"type": "set", "hash_keys": ["port"], "block": {"address": {"type": "string"}}}
        }));
        assert!(block.validate().is_err());
    }

    #[test]
    fn test_transform_kind_checked() {
        let block = parse(serde_json::json!({"name": {"type": "string", "transform": "duration_seconds"}}));
        assert!(block.validate().is_err());
    }

    #[test]
    fn test_default_must_match_kind() {
        let ok = parse(serde_json::json!({"scale": {"type": "int", "default": 1}}));
        assert!(ok.validate().is_ok());
        let bad = parse(serde_json::json!({"scale": {"type": "int", "default": "one"}}));
        assert!(bad.validate().is_err());
    }
}
