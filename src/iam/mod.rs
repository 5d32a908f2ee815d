//! Access policies
//!
//! - [`policy`] - members, bindings, normalized policies and their diff
//! - [`updater`] - reading policies and the read-modify-write update loop

pub mod policy;
pub mod updater;

pub use policy::{diff, AccessPolicy, Binding, Member, PolicyDelta};
pub use updater::{plan, read_modify_write, read_policy, PolicyEdit, PolicyRetry};
