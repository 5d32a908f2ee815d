//! Resource abstraction layer
//!
//! Resource kinds are data, not code. Each kind is described by an embedded
//! JSON table under `src/resources/`:
//! - `compute.json` - instance groups
//! - `loadbalancer.json` - network load balancers and target groups
//! - `resourcemanager.json` - clouds and folders
//! - `iam.json` - service accounts
//!
//! - [`registry`] - loads and validates the tables
//! - [`dispatch`] - builds the REST request for a kind and call
//! - [`fetcher`] - paginated list calls

pub mod dispatch;
pub mod fetcher;
pub mod registry;

pub use fetcher::{fetch_all, fetch_page, PaginatedResult};
pub use registry::*;
