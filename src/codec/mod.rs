//! Attribute codec
//!
//! Flat attribute tree ↔ structured values ↔ API JSON, driven by the
//! per-resource field tables.

pub mod api;
pub mod decode;
pub mod encode;
pub mod hash;
pub mod schema;
pub mod tree;
pub mod value;

pub use api::{from_api, settle, to_api, RequestMode};
pub use decode::{decode, decode_resource};
pub use encode::encode;
pub use hash::member_key;
pub use schema::{BlockDef, FieldDef, FieldKind, Transform};
pub use tree::{AttrValue, AttributeTree, CollectionKind, Scalar};
pub use value::{Block, Value};
