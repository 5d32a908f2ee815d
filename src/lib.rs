//! Declarative reconciliation core for Yandex Cloud resources
//!
//! - [`codec`] - attribute tree ↔ structured values ↔ API JSON
//! - [`resolver`] - human names → object ids
//! - [`operation`] - long-running operation waiter
//! - [`iam`] - access-policy diff and read-modify-write updates
//! - [`reconciler`] - create/read/update/delete/import per resource kind
//!
//! All remote calls go through the [`cloud::Rpc`] trait; [`cloud::CloudClient`]
//! is the REST implementation.

pub mod cancel;
pub mod cloud;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod iam;
pub mod operation;
pub mod reconciler;
pub mod resolver;
pub mod resource;

pub use cancel::{CancellationToken, Deadline};
pub use config::ProviderConfig;
pub use context::ProviderContext;
pub use error::{ProviderError, Result, RpcError, StatusCode};
pub use reconciler::{ReadOutcome, Reconciler};
