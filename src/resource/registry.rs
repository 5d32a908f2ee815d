//! Resource Registry - Load resource definitions from JSON
//!
//! Every supported kind is described by an embedded JSON table: where its
//! collection lives, how it is scoped, which fields it has. Tables are parsed
//! and validated once, on first access.

use crate::codec::schema::{BlockDef, FieldKind};
use crate::error::{ProviderError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use std::time::Duration;

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[
    include_str!("../resources/compute.json"),
    include_str!("../resources/loadbalancer.json"),
    include_str!("../resources/resourcemanager.json"),
    include_str!("../resources/iam.json"),
];

/// Container a kind is listed and created in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Folder,
    Cloud,
}

impl ScopeKind {
    /// Query parameter / request field carrying the scope id
    pub fn param(&self) -> &'static str {
        match self {
            ScopeKind::Folder => "folderId",
            ScopeKind::Cloud => "cloudId",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScopeKind::Folder => "folder",
            ScopeKind::Cloud => "cloud",
        }
    }
}

/// Parent container of a kind
#[derive(Debug, Clone, Deserialize)]
pub struct ParentDef {
    /// Schema field holding the parent id
    pub field: String,
    pub scope: ScopeKind,
}

/// Name → id reference resolved before a request is built
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceDef {
    pub name_field: String,
    pub id_field: String,
    /// Registry key of the referenced kind
    pub resource: String,
}

/// Lookup inputs of a data source
#[derive(Debug, Clone, Deserialize)]
pub struct LookupDef {
    pub id_field: String,
    pub name_field: String,
}

/// Per-action timeouts in seconds
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeoutDefs {
    #[serde(default)]
    pub create: Option<u64>,
    #[serde(default)]
    pub read: Option<u64>,
    #[serde(default)]
    pub update: Option<u64>,
    #[serde(default)]
    pub delete: Option<u64>,
}

/// Resource definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDef {
    pub display_name: String,
    /// Endpoint host prefix, e.g. `compute` → `compute.api.cloud.yandex.net`
    pub service: String,
    /// REST collection path, e.g. `compute/v1/instanceGroups`
    pub collection: String,
    /// Response field holding the items of a list call
    pub list_field: String,
    /// Response field holding the object id
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Response field holding the human name
    #[serde(default = "default_name_field")]
    pub name_field: String,
    #[serde(default)]
    pub parent: Option<ParentDef>,
    /// Extra query parameters for get calls
    #[serde(default)]
    pub get_params: BTreeMap<String, String>,
    /// Operation metadata field holding the new object's id
    #[serde(default)]
    pub metadata_id_field: Option<String>,
    #[serde(default)]
    pub timeouts: TimeoutDefs,
    /// Supports access bindings
    #[serde(default)]
    pub iam: bool,
    /// Lookup-only kind, no create/update/delete
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub data_source: Option<LookupDef>,
    #[serde(default)]
    pub references: Vec<ReferenceDef>,
    pub schema: BlockDef,
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_name_field() -> String {
    "name".to_string()
}

impl ResourceDef {
    pub fn create_timeout(&self) -> Option<Duration> {
        self.timeouts.create.map(Duration::from_secs)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.timeouts.read.map(Duration::from_secs)
    }

    pub fn update_timeout(&self) -> Option<Duration> {
        self.timeouts.update.map(Duration::from_secs)
    }

    pub fn delete_timeout(&self) -> Option<Duration> {
        self.timeouts.delete.map(Duration::from_secs)
    }

    /// Cross-field checks the schema alone cannot express
    fn validate(&self, key: &str, all: &HashMap<String, ResourceDef>) -> Result<()> {
        let invalid = |reason: String| ProviderError::InvalidSchema {
            path: key.to_string(),
            reason,
        };

        self.schema.validate().map_err(|e| match e {
            ProviderError::InvalidSchema { path, reason } => ProviderError::InvalidSchema {
                path: format!("{}.{}", key, path),
                reason,
            },
            other => other,
        })?;

        let string_field = |name: &str| {
            self.schema
                .field(name)
                .map(|f| f.kind == FieldKind::String)
                .unwrap_or(false)
        };

        if let Some(parent) = &self.parent {
            if !string_field(&parent.field) {
                return Err(invalid(format!("parent field '{}' is not a string field", parent.field)));
            }
        }
        for reference in &self.references {
            if !string_field(&reference.name_field) || !string_field(&reference.id_field) {
                return Err(invalid(format!(
                    "reference '{}' → '{}' needs two string fields",
                    reference.name_field, reference.id_field
                )));
            }
            if !all.contains_key(&reference.resource) {
                return Err(invalid(format!("reference to unknown kind '{}'", reference.resource)));
            }
        }
        if let Some(lookup) = &self.data_source {
            if !string_field(&lookup.id_field) || !string_field(&lookup.name_field) {
                return Err(invalid("data source lookup needs two string fields".into()));
            }
        }
        if self.read_only && self.data_source.is_none() {
            return Err(invalid("read-only kind without a data source lookup".into()));
        }
        Ok(())
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub resources: HashMap<String, ResourceDef>,
}

impl ResourceConfig {
    /// Merge and validate a set of JSON tables
    pub fn from_sources(sources: &[&str]) -> Result<Self> {
        let mut config = ResourceConfig::default();
        for content in sources {
            let partial: ResourceConfig =
                serde_json::from_str(content).map_err(|e| ProviderError::InvalidSchema {
                    path: String::new(),
                    reason: format!("resource table is not valid JSON: {}", e),
                })?;
            config.resources.extend(partial.resources);
        }
        for (key, def) in &config.resources {
            def.validate(key, &config.resources)?;
        }
        Ok(config)
    }

    pub fn get(&self, key: &str) -> Result<&ResourceDef> {
        self.resources
            .get(key)
            .ok_or_else(|| ProviderError::UnknownResource(key.to_string()))
    }
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<ResourceConfig> = OnceLock::new();

/// Get the resource registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static ResourceConfig {
    REGISTRY.get_or_init(|| {
        ResourceConfig::from_sources(RESOURCE_FILES)
            .unwrap_or_else(|e| panic!("Failed to load embedded resource tables: {}", e))
    })
}

/// Get a resource definition by key
pub fn get_resource(key: &str) -> Option<&'static ResourceDef> {
    get_registry().resources.get(key)
}

/// Get all resource keys, sorted
pub fn get_all_resource_keys() -> Vec<&'static str> {
    let mut keys: Vec<&str> = get_registry()
        .resources
        .keys()
        .map(|s| s.as_str())
        .collect();
    keys.sort_unstable();
    keys
}
